//! In-memory doubles for the sandbox and model gateway.
//!
//! Compiled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{GatewayError, SandboxError};
use crate::llm::{GenerateRequest, ModelGateway, ModelResponse};
use crate::sandbox::paths::{DEFAULT_WORKSPACE_ROOT, validate_path};
use crate::sandbox::{CommandOutput, Sandbox, SandboxProvider};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shorthand for a finished command.
pub fn output(exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

#[derive(Debug, Clone)]
struct ScriptedCommand {
    needle: String,
    outputs: VecDeque<CommandOutput>,
    delay: Duration,
}

/// A sandbox that keeps files in a map and answers commands from a script.
///
/// Commands are matched by substring against the scripted needles, first
/// match wins. A needle with several queued outputs yields them in order and
/// then keeps repeating the last one. Unmatched commands succeed silently.
#[derive(Debug, Default)]
pub struct MemorySandbox {
    id: String,
    files: Mutex<BTreeMap<String, String>>,
    script: Mutex<Vec<ScriptedCommand>>,
    commands: Mutex<Vec<String>>,
    timeout: Mutex<Option<Duration>>,
    read_delays: Mutex<HashMap<String, Duration>>,
}

impl MemorySandbox {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    pub fn respond(&self, needle: &str, output: CommandOutput) {
        self.respond_after(needle, Duration::ZERO, output);
    }

    /// Like [`respond`](Self::respond), but the command takes `delay` to
    /// finish (and times out if its timeout is shorter).
    pub fn respond_after(&self, needle: &str, delay: Duration, output: CommandOutput) {
        let mut script = lock(&self.script);
        if let Some(entry) = script.iter_mut().find(|e| e.needle == needle) {
            entry.outputs.push_back(output);
            entry.delay = delay;
        } else {
            script.push(ScriptedCommand {
                needle: needle.to_string(),
                outputs: VecDeque::from([output]),
                delay,
            });
        }
    }

    pub fn seed(&self, path: &str, content: &str) {
        lock(&self.files).insert(path.to_string(), content.to_string());
    }

    pub fn delay_reads(&self, path: &str, delay: Duration) {
        lock(&self.read_delays).insert(path.to_string(), delay);
    }

    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.files).get(path).cloned()
    }

    pub fn files(&self) -> BTreeMap<String, String> {
        lock(&self.files).clone()
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    pub fn timeout(&self) -> Option<Duration> {
        *lock(&self.timeout)
    }

    fn scripted(&self, command: &str) -> (Duration, CommandOutput) {
        let mut script = lock(&self.script);
        match script.iter_mut().find(|e| command.contains(&e.needle)) {
            Some(entry) => {
                let out = if entry.outputs.len() > 1 {
                    entry.outputs.pop_front().unwrap_or_default()
                } else {
                    entry.outputs.front().cloned().unwrap_or_default()
                };
                (entry.delay, out)
            }
            None => (Duration::ZERO, CommandOutput::default()),
        }
    }
}

#[async_trait]
impl Sandbox for MemorySandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError> {
        lock(&self.commands).push(command.to_string());
        let (delay, out) = self.scripted(command);
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(SandboxError::CommandTimeout {
                secs: timeout.as_secs(),
            });
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(out)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let path = validate_path(path, DEFAULT_WORKSPACE_ROOT)?;
        lock(&self.files).insert(path.relative, content.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let path = validate_path(path, DEFAULT_WORKSPACE_ROOT)?;
        let delay = lock(&self.read_delays).get(&path.relative).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.files).get(&path.relative).cloned().ok_or_else(|| {
            SandboxError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.relative),
            ))
        })
    }

    async fn set_timeout(&self, timeout: Duration) -> Result<(), SandboxError> {
        *lock(&self.timeout) = Some(timeout);
        Ok(())
    }

    fn host(&self, port: u16) -> String {
        format!("https://{}-{}.sandbox.test", port, self.id)
    }
}

/// Provider handing out [`MemorySandbox`]es, with failure injection.
#[derive(Debug, Default)]
pub struct MemorySandboxProvider {
    sandboxes: Mutex<HashMap<String, Arc<MemorySandbox>>>,
    script: Mutex<Vec<(String, CommandOutput)>>,
    failing_templates: Mutex<HashSet<String>>,
    fail_creates: AtomicU32,
    create_calls: AtomicU32,
    connect_calls: AtomicU32,
    templates: Mutex<Vec<String>>,
    next_id: AtomicU32,
}

impl MemorySandboxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` create calls.
    pub fn fail_next_creates(&self, n: u32) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    /// Always fail creates from this template.
    pub fn fail_template(&self, template: &str) {
        lock(&self.failing_templates).insert(template.to_string());
    }

    /// Script a command response on every sandbox created from now on.
    pub fn respond(&self, needle: &str, output: CommandOutput) {
        lock(&self.script).push((needle.to_string(), output));
    }

    /// Register an existing sandbox so `connect` can find it.
    pub fn insert(&self, sandbox: Arc<MemorySandbox>) {
        lock(&self.sandboxes).insert(sandbox.id().to_string(), sandbox);
    }

    pub fn sandbox(&self, id: &str) -> Option<Arc<MemorySandbox>> {
        lock(&self.sandboxes).get(id).cloned()
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Templates requested by create calls, in order.
    pub fn templates(&self) -> Vec<String> {
        lock(&self.templates).clone()
    }
}

#[async_trait]
impl SandboxProvider for MemorySandboxProvider {
    async fn create(
        &self,
        template: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn Sandbox>, SandboxError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.templates).push(template.to_string());

        let injected = self
            .fail_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || lock(&self.failing_templates).contains(template) {
            return Err(anyhow::anyhow!("template {} failed to boot", template).into());
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let sandbox = Arc::new(MemorySandbox::new(&format!("mem-sbx-{}", n)));
        for (needle, out) in lock(&self.script).iter() {
            sandbox.respond(needle, out.clone());
        }
        sandbox.set_timeout(timeout).await?;
        self.insert(Arc::clone(&sandbox));
        Ok(sandbox)
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        match self.sandbox(sandbox_id) {
            Some(sandbox) => Ok(sandbox),
            None => Err(SandboxError::Unavailable {
                sandbox_id: sandbox_id.to_string(),
                message: "not found".into(),
            }),
        }
    }
}

/// Gateway that replays queued responses and records every request.
///
/// An exhausted script answers with [`GatewayError::InvalidResponse`].
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<ModelResponse, GatewayError>>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedGateway {
    pub fn new(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: ModelResponse) {
        lock(&self.script).push_back(Ok(response));
    }

    pub fn push_error(&self, error: GatewayError) {
        lock(&self.script).push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        lock(&self.requests).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn generate(&self, request: &GenerateRequest) -> Result<ModelResponse, GatewayError> {
        lock(&self.requests).push(request.clone());
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::InvalidResponse("script exhausted".into())))
    }
}
