use browser_ragent_server::protocol::serve_lines;
use browser_ragent_server::testing::{ScriptedExecutor, TestHelper};
use browser_ragent_server::ToolExecutor;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

struct Client {
    writer: WriteHalf<DuplexStream>,
    replies: Lines<BufReader<ReadHalf<DuplexStream>>>,
    next_id: i64,
    serving: JoinHandle<std::io::Result<()>>,
}

impl Client {
    fn connect(executor: Arc<ScriptedExecutor>) -> Self {
        let server = TestHelper::server_with(executor as Arc<dyn ToolExecutor>).unwrap();
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_end);
        let serving = tokio::spawn(serve_lines(server, BufReader::new(server_read), server_write));
        let (client_read, writer) = tokio::io::split(client_end);
        Self {
            writer,
            replies: BufReader::new(client_read).lines(),
            next_id: 0,
            serving,
        }
    }

    async fn send_raw(&mut self, line: &str) -> Value {
        self.writer.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
        let reply = self.replies.next_line().await.unwrap().expect("server closed");
        serde_json::from_str(&reply).unwrap()
    }

    async fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let message = json!({"jsonrpc": "2.0", "id": self.next_id, "method": method, "params": params});
        let reply = self.send_raw(&message.to_string()).await;
        assert_eq!(reply["id"], self.next_id);
        reply
    }

    async fn result(&mut self, method: &str, params: Value) -> Value {
        let reply = self.request(method, params).await;
        assert!(reply.get("error").is_none(), "unexpected error: {}", reply);
        reply["result"].clone()
    }

    async fn close(mut self) {
        self.writer.shutdown().await.unwrap();
        drop(self.writer);
        let served = self.serving.await.unwrap();
        tokio_test::assert_ok!(served);
    }
}

#[tokio::test]
async fn test_agent_session_flow() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_response("navigate", json!({"title": "Example Domain"}))
            .with_response("extract_links", json!({"links": ["https://www.iana.org/domains/example"]})),
    );
    let mut client = Client::connect(Arc::clone(&executor));

    let init = client
        .result("initialize", json!({"clientInfo": {"name": "e2e"}}))
        .await;
    assert_eq!(init["serverInfo"]["name"], "browser-ragent-server");

    let tools = client.result("tools/list", json!({})).await;
    let names: Vec<&str> = tools["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"navigate"));
    assert!(names.contains(&"extract_links"));

    let navigated = client
        .result(
            "tools/call",
            json!({"name": "navigate", "arguments": {"url": "https://example.com"}, "sessionId": "agent-1"}),
        )
        .await;
    assert_eq!(navigated["success"], true);
    assert_eq!(navigated["data"]["title"], "Example Domain");

    let session = client.result("sessions/get", json!({"sessionId": "agent-1"})).await;
    assert_eq!(session["actions"].as_array().unwrap().len(), 1);
    assert_eq!(session["actions"][0]["toolName"], "navigate");

    let links = json!({"name": "extract_links", "arguments": {}, "sessionId": "agent-1"});
    let first = client.result("tools/call", links.clone()).await;
    assert_eq!(first["cached"], false);
    let before = client.result("cache/stats", json!({})).await["hitRate"].as_f64().unwrap();

    let second = client.result("tools/call", links).await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["data"], first["data"]);
    let after = client.result("cache/stats", json!({})).await["hitRate"].as_f64().unwrap();
    assert!(after > before);
    assert_eq!(executor.call_count("extract_links"), 1);

    let session = client.result("sessions/get", json!({"sessionId": "agent-1"})).await;
    assert_eq!(session["actions"].as_array().unwrap().len(), 3);

    client.close().await;
}

#[tokio::test]
async fn test_requests_before_initialize_are_rejected() {
    let mut client = Client::connect(Arc::new(ScriptedExecutor::new()));
    let reply = client
        .request("tools/call", json!({"name": "navigate", "arguments": {"url": "https://example.com"}}))
        .await;
    assert_eq!(reply["error"]["code"], -32002);
    client.close().await;
}

#[tokio::test]
async fn test_malformed_envelopes() {
    let mut client = Client::connect(Arc::new(ScriptedExecutor::new()));

    let reply = client.send_raw("{\"jsonrpc\": \"2.0\", \"id\": 1, ").await;
    assert_eq!(reply["error"]["code"], -32700);
    assert!(reply["id"].is_null());

    let reply = client.send_raw(r#"{"jsonrpc":"2.0","id":7}"#).await;
    assert_eq!(reply["error"]["code"], -32600);
    assert_eq!(reply["id"], 7);

    client.close().await;
}

#[tokio::test]
async fn test_tool_errors_carry_category_and_suggestions() {
    let mut client = Client::connect(Arc::new(ScriptedExecutor::new()));
    client.result("initialize", json!({})).await;

    let result = client
        .result("tools/call", json!({"name": "navigate", "arguments": {"url": "not a url"}}))
        .await;
    assert_eq!(result["success"], false);
    assert_eq!(result["error"]["category"], "InvalidInput");
    assert!(!result["error"]["suggestions"].as_array().unwrap().is_empty());

    client.close().await;
}
