use std::convert::{Infallible, TryInto};
use std::io::Write;
use std::net::SocketAddr;

use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use steering_proxy::proxy::http::config::Config;
use steering_proxy::proxy::http::server::HttpServer;
use steering_proxy::raw_config::{RawConfig, RawRuleStore};
use tokio::net::TcpListener;
use tokio::sync::oneshot::{channel, Sender};

async fn echo(request: Request<Body>) -> Result<Response<Body>, Infallible> {
    let path = request.uri().path().to_string();
    let body = hyper::body::to_bytes(request.into_body())
        .await
        .unwrap_or_default();
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let reply = match path.as_str() {
        "/echo_data" => json!({ "payload": payload, "hostname": "upstream" }),
        _ => json!({ "hostname": "upstream", "path": path }),
    };
    let reply = serde_json::to_vec(&reply).unwrap_or_default();
    Ok(Response::builder()
        .header(CONTENT_TYPE, "application/json")
        .header(CONTENT_LENGTH, reply.len())
        .header("x-served-by", "upstream")
        .body(Body::from(reply))
        .unwrap())
}

fn start_upstream() -> SocketAddr {
    let make_svc = make_service_fn(|_| async { Ok::<_, Infallible>(service_fn(echo)) });
    let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make_svc);
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

fn rule_db(upstream: SocketAddr) -> tempfile::NamedTempFile {
    let rules = json!([
        {
            "uri": "api/echo",
            "enabled": "true",
            "matchRules": { "method": "POST", "roles": ["devops", "admin"] },
            "operation": { "url": "echo_data" },
            "template": { "name": "" },
            "json": {
                "to_server": { "set": [{ "via": "gateway" }], "del": ["age"] },
                "to_client": { "set": [{ "served_by": "gateway" }], "del": ["hostname"] }
            }
        },
        {
            "uri": "api/get",
            "enabled": true,
            "matchRules": { "method": "GET", "roles": ["guest"] },
            "operation": { "url": format!("http://{}/get_data", upstream) }
        },
        {
            "uri": "api/disabled",
            "enabled": "false",
            "matchRules": { "method": "GET", "roles": ["guest"] },
            "operation": { "url": "get_data" }
        },
        {
            "uri": "api/down",
            "matchRules": { "method": "GET", "roles": ["guest"] },
            "operation": { "url": "http://127.0.0.1:1/get_data" }
        }
    ]);
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(&serde_json::to_vec(&rules).unwrap()).unwrap();
    file
}

async fn start_gateway(
    db: &tempfile::NamedTempFile,
    upstream: SocketAddr,
) -> (SocketAddr, Sender<()>) {
    let config: Config = RawConfig {
        listen_port: 0,
        rule_store: RawRuleStore::File(db.path().to_path_buf()),
        upstream: format!("http://{}", upstream),
        role_claim_header: None,
        upstream_timeout: None,
        tls: None,
    }
    .try_into()
    .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (sender, rx) = channel();
    tokio::spawn(async move {
        let server = HttpServer::new(config);
        server.serve_listener(listener, rx).await
    });
    (addr, sender)
}

async fn call(
    gateway: SocketAddr,
    method: Method,
    path: &str,
    role: &str,
    body: Option<Value>,
) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(format!("http://{}{}", gateway, path))
        .header("x-jwt-claim-roles", role)
        .body(match body {
            Some(body) => Body::from(serde_json::to_vec(&body).unwrap()),
            None => Body::empty(),
        })
        .unwrap();
    Client::new().request(request).await.unwrap()
}

#[tokio::test]
async fn test_gateway_steering() {
    let upstream = start_upstream();
    let db = rule_db(upstream);
    let (gateway, stop) = start_gateway(&db, upstream).await;

    let response = call(
        gateway,
        Method::POST,
        "/api/echo",
        "devops",
        Some(json!({ "name": "bob", "age": 30 })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-served-by").unwrap(), "upstream");
    let length: usize = response
        .headers()
        .get(CONTENT_LENGTH)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(length, body.len());
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        body,
        json!({ "payload": { "name": "bob", "via": "gateway" }, "served_by": "gateway" })
    );

    let response = call(gateway, Method::GET, "/api/get", "guest", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({ "hostname": "upstream", "path": "/get_data" }));

    let _ = stop.send(());
}

#[tokio::test]
async fn test_gateway_rejections() {
    let upstream = start_upstream();
    let db = rule_db(upstream);
    let (gateway, stop) = start_gateway(&db, upstream).await;

    let cases = vec![
        (Method::POST, "/api/missing", "devops", None, StatusCode::NOT_FOUND),
        (Method::GET, "/api/disabled", "guest", None, StatusCode::NOT_FOUND),
        (Method::GET, "/api/echo", "devops", None, StatusCode::FORBIDDEN),
        (Method::POST, "/api/echo", "guest", None, StatusCode::FORBIDDEN),
        (
            Method::POST,
            "/api/echo",
            "admin",
            Some(json!({ "name": 1 })),
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
        (Method::GET, "/api/down", "guest", None, StatusCode::BAD_GATEWAY),
    ];

    for (method, path, role, body, expected) in cases {
        let response = call(gateway, method.clone(), path, role, body).await;
        assert_eq!(response.status(), expected, "{} {}", method, path);
    }

    let _ = stop.send(());
}
