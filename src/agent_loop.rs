/*
 * Tether - Minimal Sandboxed Tool Agent
 * File Path: src/agent_loop.rs
 * Responsibility: Bounded planner/tool round-trip loop.
 */

use crate::llm::{self, Planner, PlannerTurn};
use crate::runner::RunnerSettings;
use crate::tools::{Dispatcher, tool_definitions};
use serde_json::Value;

/// System instruction for the planner. `{ext}` and `{interpreter}` are filled
/// from the runner settings.
const SYSTEM_PROMPT_TEMPLATE: &str = "You are a helpful AI coding agent.

When the user asks a question or makes a request, make a function call plan. You can perform the following operations:

- List files and directories
- Read file contents
- Write or overwrite files
- Execute .{ext} files with optional arguments (run with `{interpreter}`)

Work step by step and use the tools as needed.
All paths you provide must be relative to the working directory. Do not include the working directory in your function calls; it is injected automatically for security reasons.";

pub fn system_prompt(runner: &RunnerSettings) -> String {
    SYSTEM_PROMPT_TEMPLATE
        .replace("{ext}", &runner.extension)
        .replace("{interpreter}", &runner.interpreter)
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The planner answered with text and asked for nothing else.
    Completed { text: String, iterations: usize },
    /// Every round-trip was used without a final answer.
    BudgetExhausted { iterations: usize },
}

pub struct AgentLoop<P: Planner> {
    planner: P,
    dispatcher: Dispatcher,
    tools: Value,
    max_iterations: usize,
    verbose: bool,
}

impl<P: Planner> AgentLoop<P> {
    pub fn new(planner: P, dispatcher: Dispatcher, max_iterations: usize) -> Self {
        let tools = tool_definitions(dispatcher.runner_settings());
        Self {
            planner,
            dispatcher,
            tools,
            max_iterations: max_iterations.max(1),
            verbose: false,
        }
    }

    /// Print each call's arguments, not just its name.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Start a fresh conversation from a single user prompt.
    pub async fn run_prompt(&self, prompt: &str) -> anyhow::Result<LoopOutcome> {
        let mut messages = vec![llm::Message::user(prompt)];
        self.run(&mut messages).await
    }

    /// Drive the planner until it answers or the budget runs out.
    ///
    /// `messages` only ever grows. Planner transport errors are returned as-is;
    /// tool failures never are.
    pub async fn run(&self, messages: &mut Vec<llm::Message>) -> anyhow::Result<LoopOutcome> {
        let mut turn = 0;

        while turn < self.max_iterations {
            turn += 1;
            tracing::info!(turn, max = self.max_iterations, "awaiting planner");

            match self.planner.plan(messages, &self.tools).await? {
                PlannerTurn::Final(text) => {
                    messages.push(llm::Message {
                        role: llm::MessageRole::Model,
                        parts: vec![llm::MultimodalPart::text(text.clone())],
                    });
                    return Ok(LoopOutcome::Completed {
                        text,
                        iterations: turn,
                    });
                }
                PlannerTurn::ToolCalls { parts, calls } => {
                    messages.push(llm::Message {
                        role: llm::MessageRole::Model,
                        parts,
                    });
                    self.execute_tool_batch(messages, &calls).await;
                }
                PlannerTurn::Empty => {
                    tracing::warn!(turn, "planner returned neither text nor tool calls");
                }
            }
        }

        tracing::warn!(iterations = self.max_iterations, "iteration budget exhausted");
        Ok(LoopOutcome::BudgetExhausted {
            iterations: self.max_iterations,
        })
    }

    /// Run each call in request order and record its result right after it.
    pub(crate) async fn execute_tool_batch(
        &self,
        messages: &mut Vec<llm::Message>,
        calls: &[llm::ToolCallRequest],
    ) {
        for call in calls {
            if self.verbose {
                println!("Calling function: {}({})", call.name, call.args);
            } else {
                println!(" - Calling function: {}", call.name);
            }

            let result = self.dispatcher.dispatch(call).await;
            tracing::debug!(
                tool = %call.name,
                is_error = result.is_error(),
                bytes = result.text().len(),
                "tool finished"
            );
            if self.verbose {
                println!("-> {}", result.text());
            }

            messages.push(llm::Message {
                role: llm::MessageRole::Tool,
                parts: vec![result.to_part()],
            });
        }
    }
}
