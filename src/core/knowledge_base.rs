//! Static, read-only catalogue of every finding a probe can emit.
//! Probes only decide *that* an issue exists and attach evidence; the
//! human-readable explanation and remediation live here, keyed by code.

use crate::core::models::{ProbeKind, Severity};

/// All the human-readable information about one finding code.
pub struct FindingDetail {
    /// Machine-readable identifier (e.g. "XSS_REFLECTED").
    pub code: &'static str,
    pub title: &'static str,
    /// The probe type that emits this code.
    pub probe: ProbeKind,
    /// Fixed severity, or `None` when the classifier decides from the evidence.
    pub severity: Option<Severity>,
    pub description: &'static str,
    pub remediation: &'static str,
}

static FINDINGS: &[FindingDetail] = &[
    // --- Basic: security headers and disclosure ---
    FindingDetail {
        code: "HEADERS_HSTS_MISSING",
        title: "HSTS Header Missing",
        probe: ProbeKind::Basic,
        severity: Some(Severity::Low),
        description: "The Strict-Transport-Security header instructs browsers to only talk to the site over HTTPS. Without it, users are exposed to protocol downgrade attacks and cookie hijacking.",
        remediation: "Send 'Strict-Transport-Security: max-age=31536000; includeSubDomains' on every HTTPS response.",
    },
    FindingDetail {
        code: "HEADERS_CSP_MISSING",
        title: "Content-Security-Policy Missing",
        probe: ProbeKind::Basic,
        severity: Some(Severity::Low),
        description: "A Content-Security-Policy limits which scripts, styles and frames a browser may load, which considerably reduces the impact of injection flaws such as XSS.",
        remediation: "Define a restrictive Content-Security-Policy header listing trusted sources, then relax it only where needed.",
    },
    FindingDetail {
        code: "HEADERS_X_FRAME_OPTIONS_MISSING",
        title: "X-Frame-Options Missing",
        probe: ProbeKind::Basic,
        severity: Some(Severity::Low),
        description: "Without framing restrictions the site can be loaded inside an invisible iframe, enabling clickjacking attacks.",
        remediation: "Send 'X-Frame-Options: DENY' (or SAMEORIGIN), or use the CSP 'frame-ancestors' directive.",
    },
    FindingDetail {
        code: "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING",
        title: "X-Content-Type-Options Missing",
        probe: ProbeKind::Basic,
        severity: Some(Severity::Info),
        description: "Browsers may MIME-sniff responses and execute content that was served with a harmless content type.",
        remediation: "Send 'X-Content-Type-Options: nosniff' on every response.",
    },
    FindingDetail {
        code: "HEADERS_VERSION_DISCLOSURE",
        title: "Software Version Disclosure",
        probe: ProbeKind::Basic,
        severity: Some(Severity::Low),
        description: "Response headers reveal the exact server or framework version, which makes it trivial to look up known vulnerabilities for that release.",
        remediation: "Strip version numbers from 'Server' and 'X-Powered-By' headers (e.g. 'server_tokens off' in nginx, 'expose_php = Off' in PHP).",
    },
    // --- Cross-site scripting ---
    FindingDetail {
        code: "XSS_REFLECTED",
        title: "Reflected Cross-Site Scripting",
        probe: ProbeKind::Xss,
        severity: Some(Severity::High),
        description: "A request parameter is echoed back into the HTML response without encoding. An attacker can craft a link that runs arbitrary JavaScript in the victim's session.",
        remediation: "Encode all untrusted data for the output context (HTML body, attribute, JavaScript) and deploy a Content-Security-Policy.",
    },
    FindingDetail {
        code: "XSS_FORM_REFLECTED",
        title: "Reflected Cross-Site Scripting in Form Input",
        probe: ProbeKind::Xss,
        severity: Some(Severity::High),
        description: "A form field submitted to the application is reflected unencoded in the response, allowing script injection.",
        remediation: "Validate form input server-side and context-encode every value written back into the page.",
    },
    // --- SQL injection ---
    FindingDetail {
        code: "SQLI_ERROR_BASED",
        title: "SQL Injection (Error-Based)",
        probe: ProbeKind::SqlInjection,
        severity: Some(Severity::Critical),
        description: "Injecting SQL metacharacters into a parameter makes the application return a database error message, which shows the input reaches a query unescaped.",
        remediation: "Use parameterized queries or prepared statements everywhere, and never return raw database errors to clients.",
    },
    FindingDetail {
        code: "SQLI_BOOLEAN_BASED",
        title: "SQL Injection (Boolean-Based Blind)",
        probe: ProbeKind::SqlInjection,
        severity: Some(Severity::High),
        description: "Appending an always-true condition leaves the response unchanged while an always-false condition changes it, indicating the parameter is evaluated inside a SQL query.",
        remediation: "Use parameterized queries, apply least-privilege database accounts and validate input types strictly.",
    },
    // --- HTTP methods ---
    FindingDetail {
        code: "HTTP_TRACE_ENABLED",
        title: "Cross-Site Tracing (TRACE Enabled)",
        probe: ProbeKind::HttpMethods,
        severity: None,
        description: "The server answers TRACE/TRACK requests by echoing the request, including headers. Combined with a client-side flaw this exposes cookies and credentials, even HttpOnly ones.",
        remediation: "Disable TRACE and TRACK on the web server and any reverse proxy (e.g. 'TraceEnable off' in Apache).",
    },
    FindingDetail {
        code: "HTTP_DANGEROUS_METHOD_ENABLED",
        title: "Dangerous HTTP Method Accepted",
        probe: ProbeKind::HttpMethods,
        severity: None,
        description: "The server accepted a state-changing HTTP method without any credentials. Depending on the handler this may allow uploading, modifying or deleting resources.",
        remediation: "Only allow the methods each endpoint needs and require authentication for PUT, PATCH and DELETE.",
    },
    FindingDetail {
        code: "HTTP_DANGEROUS_METHODS_ADVERTISED",
        title: "Dangerous HTTP Methods Advertised",
        probe: ProbeKind::HttpMethods,
        severity: Some(Severity::Low),
        description: "The OPTIONS response advertises methods such as PUT, DELETE or TRACE. Even if unused they widen the attack surface.",
        remediation: "Restrict the 'Allow' list to the methods the application actually serves.",
    },
    // --- File upload ---
    FindingDetail {
        code: "FILE_UPLOAD_DANGEROUS_TYPE",
        title: "Executable File Upload Accepted",
        probe: ProbeKind::FileUpload,
        severity: Some(Severity::Critical),
        description: "The upload endpoint accepted a server-side script (e.g. PHP or JSP). If the file is reachable it can lead to remote code execution.",
        remediation: "Allow-list file extensions and content types, store uploads outside the web root and rename them server-side.",
    },
    FindingDetail {
        code: "FILE_UPLOAD_DOUBLE_EXTENSION",
        title: "Double Extension Upload Accepted",
        probe: ProbeKind::FileUpload,
        severity: Some(Severity::High),
        description: "A file named like 'shell.php.jpg' was accepted. Misconfigured servers may still execute it as a script.",
        remediation: "Validate the final extension and the real file content, and generate server-side file names.",
    },
    FindingDetail {
        code: "FILE_UPLOAD_SVG_SCRIPT",
        title: "SVG With Embedded Script Accepted",
        probe: ProbeKind::FileUpload,
        severity: Some(Severity::High),
        description: "An SVG image containing a <script> element was accepted. Served from the application's origin it results in stored XSS.",
        remediation: "Sanitize or reject SVG uploads and serve user content from a separate origin with 'Content-Disposition: attachment'.",
    },
    FindingDetail {
        code: "FILE_UPLOAD_NO_TYPE_RESTRICTION",
        title: "Upload Form Without Type Restriction",
        probe: ProbeKind::FileUpload,
        severity: Some(Severity::Low),
        description: "A file input does not declare an 'accept' attribute. This is a client-side hint only, but often signals that the server does not validate types either.",
        remediation: "Declare accepted types on the form and enforce the same allow-list on the server.",
    },
];

/// Retrieves the full detail for a finding code, or `None` for unknown codes.
pub fn get_finding_detail(code: &str) -> Option<&'static FindingDetail> {
    FINDINGS.iter().find(|f| f.code == code)
}

/// All codes a given probe type can emit.
pub fn codes_for(probe: ProbeKind) -> impl Iterator<Item = &'static str> {
    FINDINGS.iter().filter(move |f| f.probe == probe).map(|f| f.code)
}
