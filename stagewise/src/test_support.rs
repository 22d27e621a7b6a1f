//! Test-only fixtures and scripted agent doubles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow};
use async_stream::stream;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::agents::{Agent, Cancelled, EventStream, Tool, ToolRegistry};
use crate::core::types::{Criterion, Stage};
use crate::event::Event;
use crate::session::{Role, Session};

/// Open stage with a deterministic description.
pub fn stage(index: u32, title: &str) -> Stage {
    Stage {
        index,
        title: title.to_string(),
        description: format!("{title} description"),
        completed: false,
        implementation_result: String::new(),
        skipped: false,
    }
}

/// Unmet criterion.
pub fn criterion(index: u32, text: &str) -> Criterion {
    Criterion {
        index,
        criteria: text.to_string(),
        met: false,
    }
}

pub fn criterion_met(index: u32, text: &str) -> Criterion {
    Criterion {
        met: true,
        ..criterion(index, text)
    }
}

/// Drain a stream, stopping at the first error.
pub async fn collect<S>(stream: S) -> Result<Vec<Event>>
where
    S: Stream<Item = Result<Event>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        events.push(item?);
    }
    Ok(events)
}

/// Drain a stream, keeping error items in place.
pub async fn collect_all<S>(stream: S) -> Vec<Result<Event>>
where
    S: Stream<Item = Result<Event>>,
{
    stream.collect().await
}

/// One scripted action.
#[derive(Debug, Clone)]
pub enum Step {
    Message(String),
    Thought(String),
    /// Streamed fragment; not recorded in the log.
    Partial(String),
    /// Emit a tool call, invoke it through the agent's registry, emit the result.
    ToolCall { name: String, arguments: Value },
    /// Write a state key under the agent's role. Emits nothing.
    Write { key: String, value: Value },
    /// Message carrying the escalation flag.
    Escalate(String),
    Fail(String),
    Cancel,
}

impl Step {
    pub fn message(text: &str) -> Self {
        Step::Message(text.to_string())
    }

    pub fn write(key: &str, value: Value) -> Self {
        Step::Write {
            key: key.to_string(),
            value,
        }
    }

    pub fn tool_call(name: &str, arguments: Value) -> Self {
        Step::ToolCall {
            name: name.to_string(),
            arguments,
        }
    }
}

/// Agent that plays back queued scripts, one per invocation.
///
/// Once the queue is empty it replays the last script if built with
/// [`ScriptedAgent::repeating`], and emits nothing otherwise.
pub struct ScriptedAgent {
    name: String,
    role: Role,
    scripts: Mutex<VecDeque<Vec<Step>>>,
    last: Mutex<Option<Vec<Step>>>,
    repeat: bool,
    tools: ToolRegistry,
    calls: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            role: Role::External,
            scripts: Mutex::new(VecDeque::from([steps])),
            last: Mutex::new(None),
            repeat: false,
            tools: ToolRegistry::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue the script for the next unscripted invocation.
    pub fn then(self, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(steps);
        self
    }

    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Vec<Step> {
        let queued = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match queued {
            Some(steps) => {
                *last = Some(steps.clone());
                steps
            }
            None if self.repeat => last.clone().unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, session: &'a mut Session) -> EventStream<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let steps = self.next_script();
        let author = self.name.as_str();
        Box::pin(stream! {
            for step in steps {
                match step {
                    Step::Message(text) => yield Ok(session.emit(Event::message(author, text))),
                    Step::Thought(text) => yield Ok(session.emit(Event::thought(author, text))),
                    Step::Partial(text) => yield Ok(session.emit(Event::message(author, text).partial())),
                    Step::Escalate(text) => {
                        yield Ok(session.emit(Event::message(author, text).escalating()));
                    }
                    Step::ToolCall { name, arguments } => {
                        yield Ok(session.emit(Event::tool_call(author, name.as_str(), arguments.clone())));
                        let result = match self.tools.invoke(&name, arguments).await {
                            Ok(value) => Event::tool_result(author, name.as_str(), value, false),
                            Err(err) => Event::tool_result(author, name.as_str(), Value::String(format!("{err:#}")), true),
                        };
                        yield Ok(session.emit(result));
                    }
                    Step::Write { key, value } => {
                        if let Err(err) = session.state_mut().write(self.role, &key, value) {
                            yield Err(err);
                            return;
                        }
                    }
                    Step::Fail(message) => {
                        yield Err(anyhow!(message));
                        return;
                    }
                    Step::Cancel => {
                        yield Err(Cancelled.into());
                        return;
                    }
                }
            }
        })
    }
}

type SessionFn = dyn Fn(&mut Session, usize) -> Result<()> + Send + Sync;

/// Agent backed by a closure over the session.
///
/// The closure receives the zero-based invocation number. On success the agent
/// emits a single `done` message; an `Err` is yielded as the stream's error.
pub struct FnAgent {
    name: String,
    func: Box<SessionFn>,
    calls: AtomicUsize,
}

impl FnAgent {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Session, usize) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            func: Box::new(func),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Agent for FnAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, session: &'a mut Session) -> EventStream<'a> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(stream! {
            match (self.func)(&mut *session, call) {
                Ok(()) => yield Ok(session.emit(Event::message(self.name.as_str(), "done"))),
                Err(err) => yield Err(err),
            }
        })
    }
}

/// Counts invocations of a wrapped agent.
pub struct CountingAgent {
    inner: Arc<dyn Agent>,
    calls: AtomicUsize,
}

impl CountingAgent {
    pub fn new(inner: Arc<dyn Agent>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Agent for CountingAgent {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn run<'a>(&'a self, session: &'a mut Session) -> EventStream<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.run(session)
    }
}

type ToolFn = dyn Fn(Value) -> Result<Value> + Send + Sync;

/// Synchronous tool backed by a closure.
pub struct FnTool {
    name: String,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            func: Box::new(func),
        }
    }
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, arguments: Value) -> BoxFuture<'_, Result<Value>> {
        let result = (self.func)(arguments);
        Box::pin(async move { result })
    }
}
