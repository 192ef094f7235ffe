//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use crate::db::{Message, ToolCallRequest};
use crate::llm::{DeltaSink, LlmError, LlmRequest, LlmResponse, LlmService, ModelOutput, Usage};
use crate::mcp::McpError;
use crate::tools::{Tool, ToolError, ToolOutput};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Mock LLM
// ============================================================================

/// One scripted model reply: streamed fragments, then the final output
#[derive(Debug, Clone)]
pub struct MockReply {
    pub deltas: Vec<String>,
    pub output: ModelOutput,
}

/// Mock model that returns queued replies in order
#[derive(Default)]
pub struct MockLlm {
    replies: Mutex<VecDeque<Result<MockReply, LlmError>>>,
    delay: Option<Duration>,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a final answer streamed as a single fragment
    pub fn queue_answer(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(MockReply {
            deltas: vec![text.to_string()],
            output: ModelOutput::Answer(Message::assistant(text, vec![])),
        }));
    }

    /// Queue a reply requesting `(id, tool_name)` calls with empty input
    pub fn queue_tool_calls(&self, calls: &[(&str, &str)]) {
        let calls: Vec<_> = calls
            .iter()
            .map(|(id, name)| ToolCallRequest::new(*id, *name, json!({})))
            .collect();
        self.replies.lock().unwrap().push_back(Ok(MockReply {
            deltas: vec![],
            output: ModelOutput::from_message(Message::assistant("", calls)),
        }));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlm {
    async fn complete(
        &self,
        request: &LlmRequest,
        on_delta: DeltaSink<'_>,
    ) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::unknown("No mock response queued")))?;
        for delta in &reply.deltas {
            on_delta(delta);
        }
        Ok(LlmResponse {
            output: reply.output,
            usage: Usage::default(),
        })
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Mock Tools
// ============================================================================

/// Tool with a fixed output that records its inputs
pub struct MockTool {
    name: String,
    result: Result<ToolOutput, String>,
    delay: Option<Duration>,
    pub inputs: Mutex<Vec<Value>>,
}

impl MockTool {
    pub fn new(name: impl Into<String>, output: ToolOutput) -> Self {
        Self {
            name: name.into(),
            result: Ok(output),
            delay: None,
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// A tool whose every call raises
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
            ..Self::new(name, ToolOutput::success(""))
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("Mock {}", self.name)
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn run(&self, input: Value) -> Result<ToolOutput, ToolError> {
        self.inputs.lock().unwrap().push(input);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone().map_err(|message| ToolError::Provider {
            provider: "mock".to_string(),
            source: McpError::Transport(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Role};
    use crate::runtime::events::{channel, ExecutionEvent};
    use crate::runtime::traits::DatabaseStorage;
    use crate::runtime::TurnExecutor;
    use crate::state_machine::INTERRUPTED_TOOL_RESULT;
    use crate::tools::ToolDispatcher;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    type TestExecutor = TurnExecutor<DatabaseStorage, ToolDispatcher>;

    fn executor(llm: &Arc<MockLlm>, tools: Vec<Arc<dyn Tool>>, max_tool_cycles: u32) -> TestExecutor {
        let storage = DatabaseStorage::new(Database::open_in_memory().unwrap());
        TurnExecutor::new(
            storage,
            llm.clone(),
            ToolDispatcher::new(tools),
            max_tool_cycles,
        )
    }

    async fn run(executor: &TestExecutor, thread_id: &str, text: &str) -> Vec<ExecutionEvent> {
        run_with(executor, thread_id, text, CancellationToken::new()).await
    }

    async fn run_with(
        executor: &TestExecutor,
        thread_id: &str,
        text: &str,
        cancel: CancellationToken,
    ) -> Vec<ExecutionEvent> {
        let (sink, mut rx) = channel();
        executor.execute(thread_id, text, sink, cancel).await;
        let mut events = vec![];
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn latest(executor: &TestExecutor, thread_id: &str) -> (i64, Vec<Message>) {
        executor
            .storage()
            .inner()
            .latest_checkpoint(thread_id)
            .unwrap()
            .map_or((0, vec![]), |c| (c.step, c.messages))
    }

    fn start(tool: &str) -> ExecutionEvent {
        ExecutionEvent::ToolStart { tool: tool.into() }
    }

    fn end(tool: &str) -> ExecutionEvent {
        ExecutionEvent::ToolEnd { tool: tool.into() }
    }

    #[tokio::test]
    async fn test_simple_text_response() {
        let llm = Arc::new(MockLlm::new());
        llm.queue_answer("Hello!");
        let exec = executor(&llm, vec![], 5);

        let events = run(&exec, "t1", "Hi").await;
        assert_eq!(
            events,
            vec![ExecutionEvent::ContentDelta {
                content: "Hello!".into()
            }]
        );

        let (step, messages) = latest(&exec, "t1");
        assert_eq!(step, 2);
        assert_eq!(messages, vec![Message::user("Hi"), Message::assistant("Hello!", vec![])]);
        assert_eq!(exec.storage().inner().titles().unwrap()["t1"], "Hi");
    }

    #[tokio::test]
    async fn test_tool_execution_cycle() {
        let llm = Arc::new(MockLlm::new());
        llm.queue_tool_calls(&[("a", "web_search"), ("b", "get_stock_price")]);
        llm.queue_answer("AAPL is 189.91 and it is sunny");
        let search = Arc::new(MockTool::new("web_search", ToolOutput::success("sunny")));
        let quote = Arc::new(MockTool::new("get_stock_price", ToolOutput::success("189.91")));
        let exec = executor(&llm, vec![search.clone(), quote], 5);

        let events = run(&exec, "t1", "stocks and weather").await;
        assert_eq!(
            events,
            vec![
                start("web_search"),
                end("web_search"),
                start("get_stock_price"),
                end("get_stock_price"),
                ExecutionEvent::ContentDelta {
                    content: "AAPL is 189.91 and it is sunny".into()
                },
            ]
        );

        let (step, messages) = latest(&exec, "t1");
        assert_eq!(step, 4);
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
        assert_eq!(messages[2], Message::tool("a", "sunny"));
        assert_eq!(search.inputs.lock().unwrap().len(), 1);

        let requests = llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[0].tools.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_soft_failure() {
        let llm = Arc::new(MockLlm::new());
        llm.queue_tool_calls(&[("a", "teleport")]);
        llm.queue_answer("I cannot do that");
        let exec = executor(&llm, vec![], 5);

        let events = run(&exec, "t1", "go").await;
        assert_eq!(events[0], start("teleport"));
        assert_eq!(events[1], end("teleport"));

        let (_, messages) = latest(&exec, "t1");
        assert_eq!(messages[2], Message::tool("a", "Unknown tool: teleport"));
        assert_eq!(messages.last().unwrap().text(), "I cannot do that");
    }

    #[tokio::test]
    async fn test_model_error_emits_one_error() {
        let llm = Arc::new(MockLlm::new());
        llm.queue_error(LlmError::from_status(503, "overloaded"));
        let exec = executor(&llm, vec![], 5);

        let events = run(&exec, "t1", "Hi").await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ExecutionEvent::Error { .. }));

        let (step, messages) = latest(&exec, "t1");
        assert_eq!(step, 1);
        assert_eq!(messages, vec![Message::user("Hi")]);
    }

    #[tokio::test]
    async fn test_raising_tool_aborts_and_next_turn_repairs() {
        let llm = Arc::new(MockLlm::new());
        llm.queue_tool_calls(&[("a", "web_search")]);
        let failing = Arc::new(MockTool::failing("web_search", "connection reset"));
        let exec = executor(&llm, vec![failing], 5);

        let events = run(&exec, "t1", "search").await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], start("web_search"));
        match &events[1] {
            ExecutionEvent::Error { content } => assert!(content.contains("connection reset")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(latest(&exec, "t1").0, 2);

        llm.queue_answer("sorry");
        run(&exec, "t1", "again").await;
        let (step, messages) = latest(&exec, "t1");
        assert_eq!(step, 4);
        assert_eq!(messages[2], Message::tool("a", INTERRUPTED_TOOL_RESULT));
        assert_eq!(messages[3], Message::user("again"));
    }

    #[tokio::test]
    async fn test_tool_loop_bound() {
        let llm = Arc::new(MockLlm::new());
        llm.queue_tool_calls(&[("a", "web_search")]);
        llm.queue_tool_calls(&[("b", "web_search")]);
        let search = Arc::new(MockTool::new("web_search", ToolOutput::success("again")));
        let exec = executor(&llm, vec![search], 1);

        let events = run(&exec, "t1", "loop").await;
        let errors: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            &ExecutionEvent::Error {
                content: "Tool loop exceeded 1 cycles".into()
            }
        );
        assert_eq!(events.last(), Some(errors[0]));
        // begin, first tool request, tool results; the second request is dropped
        assert_eq!(latest(&exec, "t1").0, 3);
    }

    #[tokio::test]
    async fn test_cancel_during_model_request() {
        let llm = Arc::new(MockLlm::new().with_delay(Duration::from_secs(10)));
        llm.queue_answer("too late");
        let exec = executor(&llm, vec![], 5);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let events = run_with(&exec, "t1", "Hi", cancel).await;
        assert_eq!(
            events,
            vec![ExecutionEvent::Error {
                content: "Turn cancelled".into()
            }]
        );
        assert_eq!(latest(&exec, "t1").0, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_tool() {
        let llm = Arc::new(MockLlm::new());
        llm.queue_tool_calls(&[("a", "slow")]);
        let slow = Arc::new(
            MockTool::new("slow", ToolOutput::success("done")).with_delay(Duration::from_secs(10)),
        );
        let exec = executor(&llm, vec![slow], 5);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let events = run_with(&exec, "t1", "Hi", cancel).await;
        assert_eq!(events.first(), Some(&start("slow")));
        assert!(!events.contains(&end("slow")));
        assert_eq!(latest(&exec, "t1").0, 2);
    }

    #[tokio::test]
    async fn test_title_set_once() {
        let llm = Arc::new(MockLlm::new());
        llm.queue_answer("one");
        llm.queue_answer("two");
        let exec = executor(&llm, vec![], 5);

        let long = "a".repeat(45);
        run(&exec, "t1", &long).await;
        run(&exec, "t1", "second message").await;

        let titles = exec.storage().inner().titles().unwrap();
        assert_eq!(titles["t1"], format!("{}...", "a".repeat(40)));
        assert_eq!(latest(&exec, "t1").0, 4);
    }

    #[tokio::test]
    async fn test_system_prompt_forwarded() {
        let llm = Arc::new(MockLlm::new());
        llm.queue_answer("ok");
        let exec = executor(&llm, vec![], 5).with_system_prompt(Some("Be brief.".into()));

        run(&exec, "t1", "Hi").await;
        assert_eq!(
            llm.recorded_requests()[0].system.as_deref(),
            Some("Be brief.")
        );
    }
}
