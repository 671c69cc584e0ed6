//! Agent sessions: a persistent namespace, resource budgets, and the host
//! primitives scripts call into.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::builtins::Args;
use super::eval::{Effects, Interpreter, Namespace};
use super::host::{chunk_to_value, hit_to_value, ids_to_value, MemoryHost};
use super::parser::parse_program;
use super::policy::{self, HOST_PRIMITIVES};
use super::value::{
    as_int, check_depth, to_str, truthy, type_error, type_name, value_error, MAX_DEPTH,
};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::llm::QueryProvider;
use crate::memory::{ChunkId, LinkType};

/// Slack for float cost comparisons; reaching the budget exactly is allowed.
const COST_EPSILON: f64 = 1e-9;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    /// `FINAL` was called; only `reset` makes the session usable again.
    Completed,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub iteration_count: u32,
    pub total_cost: f64,
    pub variables_count: usize,
    pub errors_count: usize,
}

#[derive(Debug, Default)]
struct Ledger {
    iteration_count: u32,
    total_cost: f64,
    completed: bool,
    result: Option<Value>,
    output: Vec<String>,
    errors: Vec<String>,
    accessed_chunks: Vec<ChunkId>,
    read_chunks: Vec<ChunkId>,
}

fn note(list: &mut Vec<ChunkId>, id: &ChunkId) {
    if !list.contains(id) {
        list.push(id.clone());
    }
}

/// A capability-scoped execution context for agent code.
///
/// Scripts see only the builtins, their own variables, and the memory
/// primitives backed by the attached [`MemoryHost`] and [`QueryProvider`].
pub struct Session {
    config: SessionConfig,
    host: Option<Arc<dyn MemoryHost>>,
    provider: Option<Arc<dyn QueryProvider>>,
    namespace: Namespace,
    ledger: Ledger,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            host: None,
            provider: None,
            namespace: Namespace::new(),
            ledger: Ledger::default(),
        }
    }

    pub fn with_host(mut self, host: Arc<dyn MemoryHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn QueryProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Check and run `code`.
    ///
    /// A single expression evaluates to its value; a statement program
    /// evaluates to null and commits its new top-level bindings (names not
    /// starting with `_`) only if it finishes without error. `timeout`
    /// defaults to the configured bound.
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    pub fn execute(&mut self, code: &str, timeout: Option<Duration>) -> Result<Value> {
        if self.ledger.completed {
            return Err(Error::session_misuse(
                "Session already completed; call reset() to start over",
            ));
        }
        let outcome = self.run(code, timeout);
        if let Err(err) = &outcome {
            debug!(error = %err, "Execution failed");
            self.ledger.errors.push(err.to_string());
        }
        outcome
    }

    fn run(&mut self, code: &str, timeout: Option<Duration>) -> Result<Value> {
        let program = parse_program(code)?;
        if let Err(err) = policy::check(&program) {
            warn!(error = %err, "Rejected agent code");
            return Err(err);
        }

        let timeout = timeout.unwrap_or(Duration::from_millis(self.config.timeout_ms));
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let started = Instant::now();
        let mut scratch = self.namespace.clone();
        let mut runtime = Runtime {
            config: &self.config,
            host: self.host.as_deref(),
            provider: self.provider.as_deref(),
            ledger: &mut self.ledger,
            deadline: started.checked_add(timeout),
            timeout_ms,
        };
        let value = Interpreter::new(&mut scratch, &mut runtime).run(&program)?;

        if started.elapsed() > timeout {
            return Err(Error::timeout(timeout_ms));
        }
        let existing = &self.namespace;
        scratch.retain(|name, _| !name.starts_with('_') || existing.contains_key(name));
        self.namespace = scratch;
        Ok(value)
    }

    /// The `FINAL` answer, once the session has completed.
    pub fn retrieve(&self) -> Option<&Value> {
        if self.ledger.completed {
            self.ledger.result.as_ref()
        } else {
            None
        }
    }

    /// Clear variables, counters, and completion; keep host and provider.
    pub fn reset(&mut self) {
        self.namespace.clear();
        self.ledger = Ledger::default();
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.namespace.get(name)
    }

    pub fn set_variable(&mut self, name: &str, value: Value) -> Result<()> {
        let valid = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid || name.starts_with("__") || HOST_PRIMITIVES.contains(&name) {
            return Err(Error::invalid_input(format!(
                "'{}' cannot be used as a variable name",
                name
            )));
        }
        check_depth(&value, MAX_DEPTH)
            .map_err(|_| Error::invalid_input(format!("'{}' is nested too deeply", name)))?;
        self.namespace.insert(name.to_string(), value);
        Ok(())
    }

    /// Variable names mapped to their script type names.
    pub fn list_variables(&self) -> BTreeMap<String, String> {
        self.namespace
            .iter()
            .map(|(name, value)| (name.clone(), type_name(value).to_string()))
            .collect()
    }

    pub fn state(&self) -> SessionState {
        if self.ledger.completed {
            SessionState::Completed
        } else {
            SessionState::Active
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            iteration_count: self.ledger.iteration_count,
            total_cost: self.ledger.total_cost,
            variables_count: self.namespace.len(),
            errors_count: self.ledger.errors.len(),
        }
    }

    pub fn iteration_count(&self) -> u32 {
        self.ledger.iteration_count
    }

    pub fn total_cost(&self) -> f64 {
        self.ledger.total_cost
    }

    pub fn is_complete(&self) -> bool {
        self.ledger.completed
    }

    /// Lines written by `print`.
    pub fn output(&self) -> &[String] {
        &self.ledger.output
    }

    /// Messages of every failed `execute`.
    pub fn errors(&self) -> &[String] {
        &self.ledger.errors
    }

    /// Chunks surfaced by any primitive, first-seen order.
    pub fn accessed_chunks(&self) -> &[ChunkId] {
        &self.ledger.accessed_chunks
    }

    /// Chunks opened with `read_chunk`.
    pub fn read_chunks(&self) -> &[ChunkId] {
        &self.ledger.read_chunks
    }
}

/// Bind positional and keyword arguments to `names`; the first `required`
/// must be present.
fn params(func: &str, mut args: Args, names: &[&str], required: usize) -> Result<Vec<Option<Value>>> {
    let mut bound: Vec<Option<Value>> = names.iter().map(|n| args.take_keyword(n)).collect();
    args.check(func, 0, names.len())?;
    for (i, value) in args.positional.into_iter().enumerate() {
        if bound[i].is_some() {
            return Err(type_error(format!(
                "{}() got multiple values for argument '{}'",
                func, names[i]
            )));
        }
        bound[i] = Some(value);
    }
    if let Some(i) = bound.iter().take(required).position(Option::is_none) {
        return Err(type_error(format!(
            "{}() missing required argument: '{}'",
            func, names[i]
        )));
    }
    Ok(bound)
}

fn string_param(value: Option<Value>, func: &str, name: &str) -> Result<String> {
    match value {
        Some(Value::String(s)) => Ok(s),
        other => Err(type_error(format!(
            "{}() argument '{}' must be str, not '{}'",
            func,
            name,
            type_name(other.as_ref().unwrap_or(&Value::Null))
        ))),
    }
}

/// Host side of one `execute` call.
struct Runtime<'s> {
    config: &'s SessionConfig,
    host: Option<&'s dyn MemoryHost>,
    provider: Option<&'s dyn QueryProvider>,
    ledger: &'s mut Ledger,
    deadline: Option<Instant>,
    timeout_ms: u64,
}

impl<'s> Runtime<'s> {
    fn host(&self, func: &str) -> Result<&'s dyn MemoryHost> {
        self.host
            .ok_or_else(|| Error::session_misuse(format!("{}() needs a memory host", func)))
    }

    fn read_chunk(&mut self, args: Args) -> Result<Value> {
        let mut p = params("read_chunk", args, &["chunk_id"], 1)?;
        let id = ChunkId::from_string(string_param(p[0].take(), "read_chunk", "chunk_id")?);
        match self.host("read_chunk")?.read_chunk(&id)? {
            Some(chunk) => {
                note(&mut self.ledger.accessed_chunks, &chunk.id);
                note(&mut self.ledger.read_chunks, &chunk.id);
                Ok(chunk_to_value(&chunk))
            }
            None => Ok(Value::Null),
        }
    }

    fn search_chunks(&mut self, args: Args) -> Result<Value> {
        let mut p = params("search_chunks", args, &["query", "limit"], 1)?;
        let query = string_param(p[0].take(), "search_chunks", "query")?;
        let limit = match p[1].take() {
            None | Some(Value::Null) => self.config.search_limit,
            Some(v) => usize::try_from(as_int(&v, "limit")?).unwrap_or(0),
        };
        let hits = self.host("search_chunks")?.search_chunks(&query, limit)?;
        for hit in &hits {
            note(&mut self.ledger.accessed_chunks, &hit.id);
        }
        Ok(Value::Array(hits.iter().map(hit_to_value).collect()))
    }

    fn list_chunks_by_tag(&mut self, args: Args) -> Result<Value> {
        let mut p = params("list_chunks_by_tag", args, &["tags"], 1)?;
        let tags = match p[0].take() {
            Some(Value::String(tag)) => vec![tag],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(tag) => Ok(tag.clone()),
                    other => Err(type_error(format!(
                        "tags must be strings, not '{}'",
                        type_name(other)
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(type_error(format!(
                    "list_chunks_by_tag() expects a tag or a list of tags, not '{}'",
                    type_name(other.as_ref().unwrap_or(&Value::Null))
                )))
            }
        };
        let ids = self.host("list_chunks_by_tag")?.list_chunks_by_tag(&tags)?;
        for id in &ids {
            note(&mut self.ledger.accessed_chunks, id);
        }
        Ok(ids_to_value(&ids))
    }

    fn get_linked_chunks(&mut self, args: Args) -> Result<Value> {
        let mut p = params("get_linked_chunks", args, &["chunk_id", "type"], 1)?;
        let id = ChunkId::from_string(string_param(p[0].take(), "get_linked_chunks", "chunk_id")?);
        let link_type = match p[1].take() {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(
                LinkType::from_str(&s)
                    .map_err(|_| value_error(format!("unknown link type '{}'", s)))?,
            ),
            Some(other) => {
                return Err(type_error(format!(
                    "link type must be str, not '{}'",
                    type_name(&other)
                )))
            }
        };
        let ids = self.host("get_linked_chunks")?.get_linked_chunks(&id, link_type)?;
        for id in &ids {
            note(&mut self.ledger.accessed_chunks, id);
        }
        Ok(ids_to_value(&ids))
    }

    fn llm_query(&mut self, args: Args) -> Result<Value> {
        let mut p = params("llm_query", args, &["prompt", "context"], 1)?;
        let prompt = string_param(p[0].take(), "llm_query", "prompt")?;
        let context = p[1].take().unwrap_or(Value::Null);

        self.ledger.iteration_count += 1;
        if self.ledger.iteration_count > self.config.max_iterations {
            warn!(
                iterations = self.ledger.iteration_count,
                "Query rejected: iteration limit"
            );
            return Err(Error::max_iterations(self.config.max_iterations));
        }

        let budget = self.config.max_cost_usd;
        let spent = self.ledger.total_cost;
        if spent >= budget - COST_EPSILON {
            warn!(budget, spent, "Query rejected before call: budget used up");
            return Err(Error::cost_budget_exceeded(budget, spent));
        }
        let projected = spent + self.config.estimated_query_cost_usd;
        if projected > budget + COST_EPSILON {
            warn!(budget, projected, "Query rejected before call: cost budget");
            return Err(Error::cost_budget_exceeded(budget, projected));
        }

        let full_prompt = if truthy(&context) {
            let rendered = match &context {
                Value::Object(map) => map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, to_str(v)))
                    .collect::<Vec<_>>()
                    .join("\n"),
                other => {
                    return Err(type_error(format!(
                        "llm_query() context must be a dict, not '{}'",
                        type_name(other)
                    )))
                }
            };
            format!("Context:\n{}\n\nPrompt:\n{}", rendered, prompt)
        } else {
            prompt
        };

        let provider = self
            .provider
            .ok_or_else(|| Error::session_misuse("llm_query() needs a query provider"))?;
        let response = provider.query(&full_prompt)?;

        // The call already happened, so its cost counts even when it breaks the budget.
        let attempted = spent + response.cost_usd;
        self.ledger.total_cost = attempted;
        if attempted > budget + COST_EPSILON {
            warn!(budget, attempted, "Query response exceeds cost budget");
            return Err(Error::cost_budget_exceeded(budget, attempted));
        }
        debug!(
            provider = provider.name(),
            cost = response.cost_usd,
            total = attempted,
            "Recursive query complete"
        );
        Ok(Value::String(response.text))
    }

    fn finish(&mut self, args: Args) -> Result<Value> {
        let mut p = params("FINAL", args, &["answer"], 1)?;
        if self.ledger.completed {
            return Err(Error::session_misuse(
                "FINAL() can only be called once per session",
            ));
        }
        self.ledger.result = p[0].take();
        self.ledger.completed = true;
        info!(iterations = self.ledger.iteration_count, "Session completed");
        Ok(Value::Null)
    }
}

impl Effects for Runtime<'_> {
    fn call_primitive(&mut self, name: &str, args: Args) -> Result<Value> {
        match name {
            "read_chunk" => self.read_chunk(args),
            "search_chunks" => self.search_chunks(args),
            "list_chunks_by_tag" => self.list_chunks_by_tag(args),
            "get_linked_chunks" => self.get_linked_chunks(args),
            "llm_query" => self.llm_query(args),
            "FINAL" => self.finish(args),
            other => Err(Error::script(format!(
                "NameError: name '{}' is not defined",
                other
            ))),
        }
    }

    fn print(&mut self, line: String) {
        self.ledger.output.push(line);
    }

    fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::timeout(self.timeout_ms)),
            _ => Ok(()),
        }
    }

    fn max_range(&self) -> usize {
        self.config.max_range
    }
}
