// tests/probes_http.rs

use std::collections::HashSet;
use std::time::Duration;
use url::Url;
use vanguard_webscan::core::classifier::classify;
use vanguard_webscan::core::scanner::file_upload_scanner::FileUploadProbe;
use vanguard_webscan::core::scanner::headers_scanner::HeadersProbe;
use vanguard_webscan::core::scanner::http_methods_scanner::HttpMethodsProbe;
use vanguard_webscan::core::scanner::sqli_scanner::SqlInjectionProbe;
use vanguard_webscan::core::scanner::xss_scanner::XssProbe;
use vanguard_webscan::{Probe, ProbeContext, ProbeError, RawFinding, ScanSettings, Severity};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers with the request line and headers, like a server with TRACE enabled.
struct EchoRequest;

impl Respond for EchoRequest {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut body = format!("{} {} HTTP/1.1\r\n", request.method, request.url.path());
        for (name, value) in request.headers.iter() {
            body.push_str(&format!("{}: {}\r\n", name, value.to_str().unwrap_or("")));
        }
        ResponseTemplate::new(200).set_body_string(body).insert_header("content-type", "message/http")
    }
}

fn context() -> ProbeContext {
    ProbeContext::from_settings(&ScanSettings::default()).unwrap()
}

/// Context whose requests give up after one second.
fn impatient_context() -> ProbeContext {
    ProbeContext::from_settings(&ScanSettings { request_timeout_secs: 1, ..ScanSettings::default() }).unwrap()
}

fn target(server: &MockServer, path_and_query: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), path_and_query)).unwrap()
}

fn codes(findings: &[RawFinding]) -> HashSet<&str> {
    findings.iter().map(|f| f.code.as_str()).collect()
}

fn query_value(request: &Request, name: &str) -> String {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_headers_probe_reports_missing_headers_and_banner() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("server", "Apache/2.4.41 (Ubuntu)")
                .set_body_string("<html></html>"),
        )
        .mount(&server)
        .await;

    let findings = HeadersProbe.scan(&context(), &target(&server, "/")).await.unwrap();
    let found = codes(&findings);

    assert!(found.contains("HEADERS_CSP_MISSING"));
    assert!(found.contains("HEADERS_X_FRAME_OPTIONS_MISSING"));
    assert!(found.contains("HEADERS_VERSION_DISCLOSURE"));
    assert!(!found.contains("HEADERS_HSTS_MISSING"), "HSTS is not expected over plain http");
}

#[tokio::test]
async fn test_xss_probe_detects_reflected_parameter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(|request: &Request| {
            let q = query_value(request, "q");
            ResponseTemplate::new(200).set_body_string(format!("<html><p>Results for {q}</p></html>"))
        })
        .mount(&server)
        .await;

    let findings = XssProbe.scan(&context(), &target(&server, "/search?q=shoes")).await.unwrap();

    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].code, "XSS_REFLECTED");
    assert!(findings[0].evidence.contains("query parameter 'q'"));
    assert_eq!(classify(findings[0].clone()).severity, Severity::High);
}

#[tokio::test]
async fn test_xss_probe_clean_when_output_is_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(|request: &Request| {
            let q = query_value(request, "q").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;");
            ResponseTemplate::new(200).set_body_string(format!("<p>Results for {q}</p>"))
        })
        .mount(&server)
        .await;

    let findings = XssProbe.scan(&context(), &target(&server, "/search?q=shoes")).await.unwrap();
    assert!(findings.is_empty());
}

#[tokio::test]
async fn test_xss_probe_clean_when_every_payload_request_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(|request: &Request| {
            if query_value(request, "q").contains('<') {
                ResponseTemplate::new(200).set_delay(Duration::from_secs(3))
            } else {
                ResponseTemplate::new(200).set_body_string("<p>Results for shoes</p>")
            }
        })
        .mount(&server)
        .await;

    let findings = XssProbe.scan(&impatient_context(), &target(&server, "/search?q=shoes")).await.unwrap();
    assert!(findings.is_empty());
}

#[tokio::test]
async fn test_sqli_probe_detects_database_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/item"))
        .respond_with(|request: &Request| {
            if query_value(request, "id").contains('\'') {
                ResponseTemplate::new(500).set_body_string(
                    "You have an error in your SQL syntax; check the manual that corresponds to your MySQL server version",
                )
            } else {
                ResponseTemplate::new(200).set_body_string("<h1>Item 7</h1>")
            }
        })
        .mount(&server)
        .await;

    let findings = SqlInjectionProbe.scan(&context(), &target(&server, "/item?id=7")).await.unwrap();

    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].code, "SQLI_ERROR_BASED");
    assert!(findings[0].evidence.contains("MySQL"));
    assert_eq!(classify(findings[0].clone()).severity, Severity::Critical);
}

#[tokio::test]
async fn test_sqli_probe_clean_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Static page</h1>"))
        .mount(&server)
        .await;

    let findings = SqlInjectionProbe.scan(&context(), &target(&server, "/item?id=7")).await.unwrap();
    assert!(findings.is_empty());
}

#[tokio::test]
async fn test_http_methods_probe_detects_cross_site_tracing() {
    let server = MockServer::start().await;
    Mock::given(method("TRACE")).respond_with(EchoRequest).mount(&server).await;

    let findings = HttpMethodsProbe.scan(&context(), &target(&server, "/")).await.unwrap();

    assert_eq!(findings.len(), 1, "unexpected findings: {findings:?}");
    let finding = classify(findings[0].clone());
    assert_eq!(finding.code, "HTTP_TRACE_ENABLED");
    assert_eq!(finding.severity, Severity::Critical);
    assert!(finding.evidence.contains("x-vanguard-trace"));
    assert!(finding.evidence.contains("cookie"));
}

#[tokio::test]
async fn test_http_methods_probe_keeps_going_when_one_verb_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("TRACE")).respond_with(EchoRequest).mount(&server).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let findings = HttpMethodsProbe.scan(&impatient_context(), &target(&server, "/")).await.unwrap();
    let found = codes(&findings);

    assert!(found.contains("HTTP_TRACE_ENABLED"), "unexpected findings: {findings:?}");
    assert!(!found.contains("HTTP_DANGEROUS_METHOD_ENABLED"));
}

#[tokio::test]
async fn test_http_methods_probe_escalates_accepted_put() {
    let server = MockServer::start().await;
    Mock::given(method("PUT")).respond_with(ResponseTemplate::new(201)).mount(&server).await;
    Mock::given(method("OPTIONS"))
        .respond_with(ResponseTemplate::new(200).insert_header("allow", "GET, HEAD, PUT"))
        .mount(&server)
        .await;

    let findings = HttpMethodsProbe.scan(&context(), &target(&server, "/")).await.unwrap();
    let classified: Vec<_> = findings.into_iter().map(classify).collect();

    let put = classified
        .iter()
        .find(|f| f.code == "HTTP_DANGEROUS_METHOD_ENABLED")
        .expect("accepted PUT should be reported");
    assert_eq!(put.severity, Severity::High);
    assert!(put.evidence.starts_with("PUT accepted with status 201"));

    let advertised = classified
        .iter()
        .find(|f| f.code == "HTTP_DANGEROUS_METHODS_ADVERTISED")
        .expect("Allow header should be reported");
    assert_eq!(advertised.severity, Severity::Low);
}

#[tokio::test]
async fn test_file_upload_probe_reports_accepted_files() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<form action="/upload" method="post" enctype="multipart/form-data">
                 <input type="file" name="doc"><input type="text" name="title">
               </form>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(201).set_body_string("File uploaded successfully"))
        .mount(&server)
        .await;

    let findings = FileUploadProbe.scan(&context(), &target(&server, "/")).await.unwrap();
    let found = codes(&findings);

    for code in [
        "FILE_UPLOAD_NO_TYPE_RESTRICTION",
        "FILE_UPLOAD_DANGEROUS_TYPE",
        "FILE_UPLOAD_DOUBLE_EXTENSION",
        "FILE_UPLOAD_SVG_SCRIPT",
    ] {
        assert!(found.contains(code), "missing {code}");
    }
}

#[tokio::test]
async fn test_file_upload_probe_rejecting_server_is_clean() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>upload here</p>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("File type not allowed"))
        .mount(&server)
        .await;

    let findings = FileUploadProbe.scan(&context(), &target(&server, "/")).await.unwrap();
    assert!(findings.is_empty(), "unexpected findings: {findings:?}");
}

#[tokio::test]
async fn test_unreachable_target_is_a_probe_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let closed = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();

    let result = FileUploadProbe.scan(&context(), &closed).await;
    assert!(matches!(result, Err(ProbeError::Unreachable(_))), "got {result:?}");

    let result = HttpMethodsProbe.scan(&context(), &closed).await;
    assert!(matches!(result, Err(ProbeError::Unreachable(_))), "got {result:?}");
}
