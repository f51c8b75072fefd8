#![cfg(unix)]

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use mcp_bridge::mcp::StdioTransport;
use mcp_bridge::{
    BridgeError, ContentBlock, EndpointDescriptor, ModelResponse, QueryRuntime, StopReason,
    StubModel, Termination, ToolInvocation, ToolSession,
};
use serde_json::json;

const INITIALIZED: &str = r#"read line
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"weather","version":"1.0.0"}}}'
read line
"#;

const TOOLS_LISTED: &str = r#"read line
echo 'weather server ready'
echo '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}'
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"get_forecast","description":"Get weather forecast for a location","inputSchema":{"type":"object","properties":{"latitude":{"type":"number"},"longitude":{"type":"number"}},"required":["latitude","longitude"]}}]}}'
"#;

fn fake_host(steps: &str) -> StdioTransport {
    let script = format!("{INITIALIZED}{TOOLS_LISTED}{steps}");
    StdioTransport::spawn("sh", &["-c".to_string(), script], &HashMap::new())
        .expect("sh should be available")
}

fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

fn forecast_call() -> ToolInvocation {
    ToolInvocation {
        invocation_id: "tooluse_1".into(),
        tool_name: "get_forecast".into(),
        arguments: json!({"latitude": 40.71, "longitude": -74.0}),
    }
}

#[tokio::test]
async fn lists_tools_and_calls_them() {
    let mut session = ToolSession::connect(fake_host(
        r#"read line
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"Sunny, 72F"}],"isError":false}}'
read line
"#,
    ))
    .await
    .unwrap();

    let tools = session.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "get_forecast");
    assert_eq!(tools[0].input_schema.required, vec!["latitude", "longitude"]);

    let payload = session
        .call("get_forecast", json!({"latitude": 40.71, "longitude": -74.0}))
        .await
        .unwrap();
    assert_eq!(payload, json!({"text": "Sunny, 72F"}));

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert!(session.is_closed());
}

#[tokio::test]
async fn host_crash_mid_call_is_a_tool_failure() {
    let mut session = ToolSession::connect(fake_host("read line\nexit 1\n"))
        .await
        .unwrap();
    session.list_tools().await.unwrap();

    let err = session
        .call("get_forecast", json!({"latitude": 40.71, "longitude": -74.0}))
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::ToolInvocation { ref name, .. } if name == "get_forecast"));
    session.close().await.unwrap();
}

#[tokio::test]
async fn handshake_failure_is_session_init_error() {
    let transport =
        StdioTransport::spawn("sh", &["-c".to_string(), "exit 0".to_string()], &HashMap::new())
            .unwrap();

    let err = ToolSession::connect(transport).await.err().unwrap();
    assert!(matches!(err, BridgeError::SessionInit(_)));
}

#[tokio::test]
async fn answers_query_over_live_session() {
    let session = ToolSession::connect(fake_host(
        r#"read line
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"Sunny, 72F"}],"isError":false}}'
read line
"#,
    ))
    .await
    .unwrap();
    let model = StubModel::new(vec![
        ModelResponse::tool_use(vec![forecast_call()]),
        ModelResponse::text(StopReason::EndTurn, "It is sunny in New York."),
    ]);
    let runtime = QueryRuntime::new(model.clone(), EndpointDescriptor::new("weather.py"));

    let outcome = runtime
        .answer_with(session, "What's the weather in NY?")
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::Completed);
    assert_eq!(outcome.turns, 1);
    assert!(outcome.text().ends_with("It is sunny in New York."));

    let requests = model.requests();
    assert_eq!(requests[0].tool_specs[0]["name"], "get_forecast");
    let last = requests[1].history.last().unwrap();
    assert_eq!(
        last.content[0],
        ContentBlock::ToolResult {
            invocation_id: "tooluse_1".into(),
            payload: json!({"text": "Sunny, 72F"}),
        }
    );
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn slow_tool_hits_deadline_and_host_is_reaped() {
    let transport = fake_host("read line\nexec sleep 30\n");
    let pid = transport.id().unwrap();
    let session = ToolSession::connect(transport).await.unwrap();
    let model = StubModel::new(vec![ModelResponse::tool_use(vec![forecast_call()])]);
    let runtime = QueryRuntime::new(model, EndpointDescriptor::new("weather.py"))
        .with_deadline(Some(Duration::from_millis(300)));
    assert!(process_exists(pid));

    let err = runtime
        .answer_with(session, "What's the weather in NY?")
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::DeadlineExceeded(_)));
    assert!(!process_exists(pid));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn tool_error_releases_live_host() {
    let transport = fake_host(
        r#"read line
echo '{"jsonrpc":"2.0","id":3,"error":{"code":-1,"message":"boom"}}'
exec sleep 30
"#,
    );
    let pid = transport.id().unwrap();
    let session = ToolSession::connect(transport).await.unwrap();
    let model = StubModel::new(vec![ModelResponse::tool_use(vec![forecast_call()])]);
    let runtime = QueryRuntime::new(model, EndpointDescriptor::new("weather.py"));

    let err = runtime
        .answer_with(session, "What's the weather in NY?")
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::ToolInvocation { ref name, .. } if name == "get_forecast"));
    assert!(err.to_string().contains("boom"));
    assert!(!process_exists(pid));
}

#[tokio::test]
async fn null_id_error_fails_pending_call() {
    let mut session = ToolSession::connect(fake_host(
        r#"read line
echo '{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}'
read line
"#,
    ))
    .await
    .unwrap();
    session.list_tools().await.unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        session.call("get_forecast", json!({"latitude": 40.71, "longitude": -74.0})),
    )
    .await
    .expect("call should fail instead of waiting for a matching id");

    let err = result.unwrap_err();
    assert!(matches!(err, BridgeError::ToolInvocation { ref name, .. } if name == "get_forecast"));
    assert!(err.to_string().contains("Parse error"));
    session.close().await.unwrap();
}
