//! Artifact loading: turning `(artifact, function)` pairs into callables.
//!
//! [`NodeArtifactLoader`] runs each bound function in its own Node.js
//! sidecar speaking JSON lines over stdio. [`StaticArtifactLoader`] maps
//! artifact names to in-process closures.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kgrid_config::RuntimeConfig;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ActivatorError, ActivatorResult};

/// The sidecar script, embedded at compile time.
pub const BRIDGE_SCRIPT: &str = include_str!("../bridge/kgrid_bridge.mjs");

/// File name the sidecar script is written under.
pub const BRIDGE_FILE: &str = "kgrid_bridge.mjs";

/// A bound KO function.
#[async_trait]
pub trait KoFunction: Send + Sync {
    /// Run the function on `input`.
    ///
    /// # Errors
    ///
    /// Returns the function's own error message, or a description of why it
    /// could not be run.
    async fn call(&self, input: &Value) -> Result<Value, String>;
}

#[async_trait]
impl<F> KoFunction for F
where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync,
{
    async fn call(&self, input: &Value) -> Result<Value, String> {
        self(input)
    }
}

/// Resolves an artifact's exported function to a callable.
#[async_trait]
pub trait ArtifactLoader: Send + Sync {
    /// Load `function` from the artifact at `artifact` (absolute).
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::Binding`] if the artifact cannot be loaded
    /// or does not export `function`.
    async fn load_function(
        &self,
        artifact: &Path,
        function: &str,
    ) -> ActivatorResult<Arc<dyn KoFunction>>;
}

fn binding_error(artifact: &Path, function: &str, message: impl Into<String>) -> ActivatorError {
    ActivatorError::Binding {
        artifact: artifact.display().to_string(),
        function: function.to_owned(),
        message: message.into(),
    }
}

/// Write the sidecar script to `dir/kgrid_bridge.mjs`.
///
/// # Errors
///
/// Returns [`ActivatorError::Io`] if the file cannot be written.
pub fn write_bridge_script(dir: &Path) -> ActivatorResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let dest = dir.join(BRIDGE_FILE);
    std::fs::write(&dest, BRIDGE_SCRIPT)?;
    Ok(dest)
}

/// Loads JavaScript artifacts into Node.js sidecars.
///
/// Each bound function gets its own sidecar process. A sidecar that times
/// out or dies is killed and started again on the next call.
#[derive(Debug, Clone)]
pub struct NodeArtifactLoader {
    node_command: String,
    bridge: PathBuf,
    call_timeout: Duration,
}

impl NodeArtifactLoader {
    /// Create a loader, writing the sidecar script into `cache_root`.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::Io`] if the script cannot be written.
    pub fn new(cache_root: &Path, runtime: &RuntimeConfig) -> ActivatorResult<Self> {
        let bridge = std::path::absolute(write_bridge_script(cache_root)?)?;
        Ok(Self {
            node_command: runtime.node_command.clone(),
            bridge,
            call_timeout: Duration::from_secs(runtime.call_timeout_secs),
        })
    }

    /// Path of the written sidecar script.
    #[must_use]
    pub fn bridge_path(&self) -> &Path {
        &self.bridge
    }
}

#[async_trait]
impl ArtifactLoader for NodeArtifactLoader {
    async fn load_function(
        &self,
        artifact: &Path,
        function: &str,
    ) -> ActivatorResult<Arc<dyn KoFunction>> {
        if !tokio::fs::metadata(artifact)
            .await
            .is_ok_and(|m| m.is_file())
        {
            return Err(binding_error(artifact, function, "artifact not found"));
        }

        let launcher = Launcher {
            node_command: self.node_command.clone(),
            bridge: self.bridge.clone(),
            artifact: artifact.to_path_buf(),
            function: function.to_owned(),
            timeout: self.call_timeout,
        };
        let sidecar = launcher
            .spawn()
            .await
            .map_err(|message| binding_error(artifact, function, message))?;

        debug!(artifact = %artifact.display(), function, pid = ?sidecar.pid(), "sidecar ready");
        Ok(Arc::new(NodeFunction {
            launcher,
            sidecar: Mutex::new(Some(sidecar)),
        }))
    }
}

/// Everything needed to (re)start the sidecar for one function.
#[derive(Debug, Clone)]
struct Launcher {
    node_command: String,
    bridge: PathBuf,
    artifact: PathBuf,
    function: String,
    timeout: Duration,
}

impl Launcher {
    async fn spawn(&self) -> Result<Sidecar, String> {
        let mut command = Command::new(&self.node_command);
        command
            .arg(&self.bridge)
            .arg(&self.artifact)
            .arg(&self.function)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = self.artifact.parent() {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| format!("failed to start '{}': {e}", self.node_command))?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err("sidecar pipes unavailable".into());
        };

        let mut sidecar = Sidecar {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            next_id: 1,
        };
        sidecar.handshake(self.timeout).await?;
        Ok(sidecar)
    }
}

/// Why a call did not produce a result.
#[derive(Debug)]
enum CallError {
    /// The function ran and failed. The sidecar is still usable.
    Function(String),
    /// The sidecar is unusable and must be replaced.
    Sidecar(String),
}

/// A running sidecar process. Dropping it kills the process.
struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl Sidecar {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn handshake(&mut self, limit: Duration) -> Result<(), String> {
        let line = match timeout(limit, self.lines.next_line()).await {
            Err(_) => return Err("sidecar did not start in time".into()),
            Ok(Err(e)) => return Err(format!("cannot read sidecar output: {e}")),
            Ok(Ok(None)) => return Err("sidecar exited during startup".into()),
            Ok(Ok(Some(line))) => line,
        };
        let message: Value = serde_json::from_str(&line)
            .map_err(|e| format!("unexpected handshake '{line}': {e}"))?;
        if message.get("ready").and_then(Value::as_bool) == Some(true) {
            return Ok(());
        }
        Err(message
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("sidecar refused to start")
            .to_owned())
    }

    async fn call(&mut self, function: &str, input: &Value, limit: Duration) -> Result<Value, CallError> {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);

        let mut request = json!({ "id": id, "input": input }).to_string();
        request.push('\n');
        let sent = async {
            self.stdin.write_all(request.as_bytes()).await?;
            self.stdin.flush().await
        };
        sent.await
            .map_err(|e| CallError::Sidecar(format!("sidecar for {function} is not running: {e}")))?;

        match timeout(limit, self.reply(id, function)).await {
            Ok(reply) => reply,
            Err(_) => Err(CallError::Sidecar(format!(
                "call to {function} timed out after {}s",
                limit.as_secs()
            ))),
        }
    }

    async fn reply(&mut self, id: u64, function: &str) -> Result<Value, CallError> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Err(CallError::Sidecar(format!("sidecar for {function} exited"))),
                Err(e) => {
                    return Err(CallError::Sidecar(format!(
                        "cannot read from sidecar for {function}: {e}"
                    )));
                },
            };
            let Ok(response) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            if response.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = response.get("error") {
                return Err(CallError::Function(
                    error.as_str().map_or_else(|| error.to_string(), str::to_owned),
                ));
            }
            return Ok(response.get("result").cloned().unwrap_or(Value::Null));
        }
    }
}

/// One function served by a sidecar. Calls are serialized.
struct NodeFunction {
    launcher: Launcher,
    sidecar: Mutex<Option<Sidecar>>,
}

#[async_trait]
impl KoFunction for NodeFunction {
    async fn call(&self, input: &Value) -> Result<Value, String> {
        let function = &self.launcher.function;
        let mut slot = self.sidecar.lock().await;
        let mut sidecar = match slot.take() {
            Some(sidecar) => sidecar,
            None => {
                let sidecar = self.launcher.spawn().await?;
                debug!(function = %function, pid = ?sidecar.pid(), "sidecar restarted");
                sidecar
            },
        };

        match sidecar.call(function, input, self.launcher.timeout).await {
            Ok(result) => {
                *slot = Some(sidecar);
                Ok(result)
            },
            Err(CallError::Function(message)) => {
                *slot = Some(sidecar);
                Err(message)
            },
            Err(CallError::Sidecar(message)) => {
                warn!(function = %function, error = %message, "discarding sidecar");
                Err(message)
            },
        }
    }
}

/// In-process loader keyed by artifact file name and function name.
#[derive(Default, Clone)]
pub struct StaticArtifactLoader {
    functions: HashMap<(String, String), Arc<dyn KoFunction>>,
}

impl std::fmt::Debug for StaticArtifactLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticArtifactLoader")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StaticArtifactLoader {
    /// An empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` exported by artifacts named `artifact_name`.
    #[must_use]
    pub fn with_function<F>(mut self, artifact_name: &str, function: &str, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(
            (artifact_name.to_owned(), function.to_owned()),
            Arc::new(f),
        );
        self
    }
}

#[async_trait]
impl ArtifactLoader for StaticArtifactLoader {
    async fn load_function(
        &self,
        artifact: &Path,
        function: &str,
    ) -> ActivatorResult<Arc<dyn KoFunction>> {
        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.functions
            .get(&(name, function.to_owned()))
            .cloned()
            .ok_or_else(|| binding_error(artifact, function, "no such exported function"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn node_available() -> bool {
        Command::new("node")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|s| s.success())
    }

    fn runtime(command: &str) -> RuntimeConfig {
        RuntimeConfig {
            node_command: command.into(),
            call_timeout_secs: 10,
        }
    }

    #[test]
    fn bridge_script_speaks_the_protocol() {
        assert!(BRIDGE_SCRIPT.contains("ready: true"));
        assert!(BRIDGE_SCRIPT.contains("request.input"));
    }

    #[test]
    fn loader_writes_bridge_into_cache_root() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = NodeArtifactLoader::new(&tmp.path().join("shelf"), &runtime("node")).unwrap();
        let content = std::fs::read_to_string(loader.bridge_path()).unwrap();
        assert_eq!(content, BRIDGE_SCRIPT);
    }

    #[tokio::test]
    async fn missing_artifact_is_binding_error() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = NodeArtifactLoader::new(tmp.path(), &runtime("node")).unwrap();
        let err = loader
            .load_function(&tmp.path().join("nope.js"), "run")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ActivatorError::Binding { .. }));
    }

    #[tokio::test]
    async fn missing_runtime_is_binding_error() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("index.js");
        std::fs::write(&artifact, "export function run() {}").unwrap();
        let loader =
            NodeArtifactLoader::new(tmp.path(), &runtime("kgrid-no-such-runtime")).unwrap();
        let err = loader.load_function(&artifact, "run").await.err().unwrap();
        assert!(err.to_string().contains("failed to start"));
    }

    /// A stand-in sidecar written in sh: answers `"ok"` to every request and
    /// never answers one whose input mentions `hang`.
    #[cfg(unix)]
    const STUB_SIDECAR: &str = r#"echo '{"ready":true}'
while IFS= read -r line; do
  case "$line" in
    *hang*) sleep 30 ;;
    *) id=$(echo "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
       echo "{\"id\":$id,\"result\":\"ok\"}" ;;
  esac
done
"#;

    #[cfg(unix)]
    fn stub_loader(dir: &Path, call_timeout: Duration) -> NodeArtifactLoader {
        let script = dir.join("stub.sh");
        std::fs::write(&script, STUB_SIDECAR).unwrap();
        NodeArtifactLoader {
            node_command: "sh".into(),
            bridge: script,
            call_timeout,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timed_out_sidecar_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("index.js");
        std::fs::write(&artifact, "").unwrap();
        let loader = stub_loader(tmp.path(), Duration::from_millis(500));

        let f = loader.load_function(&artifact, "run").await.unwrap();
        assert_eq!(f.call(&json!({"x": 1})).await.unwrap(), json!("ok"));

        let err = f.call(&json!({"hang": true})).await.unwrap_err();
        assert!(err.contains("timed out"), "{err}");

        // A fresh sidecar answers; the stuck one is gone.
        assert_eq!(f.call(&json!({"x": 2})).await.unwrap(), json!("ok"));
        assert_eq!(f.call(&json!({"x": 3})).await.unwrap(), json!("ok"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_sidecar_fails_handshake() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("index.js");
        std::fs::write(&artifact, "").unwrap();
        let script = tmp.path().join("silent.sh");
        std::fs::write(&script, "sleep 30\n").unwrap();
        let loader = NodeArtifactLoader {
            node_command: "sh".into(),
            bridge: script,
            call_timeout: Duration::from_millis(300),
        };

        let err = loader.load_function(&artifact, "run").await.err().unwrap();
        assert!(err.to_string().contains("did not start in time"));
    }

    #[tokio::test]
    async fn node_sidecar_round_trip() {
        if !node_available().await {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("index.mjs");
        std::fs::write(
            &artifact,
            "export function welcome(input) { return `Welcome ${input.name}`; }\n\
             export function fail() { throw new Error('bad input'); }\n",
        )
        .unwrap();
        let loader = NodeArtifactLoader::new(tmp.path(), &runtime("node")).unwrap();

        let welcome = loader.load_function(&artifact, "welcome").await.unwrap();
        assert_eq!(
            welcome.call(&json!({"name": "Bob"})).await.unwrap(),
            json!("Welcome Bob")
        );
        assert_eq!(
            welcome.call(&json!({"name": "Ann"})).await.unwrap(),
            json!("Welcome Ann")
        );

        let fail = loader.load_function(&artifact, "fail").await.unwrap();
        assert_eq!(fail.call(&json!({})).await.unwrap_err(), "bad input");
        // A thrown error leaves the sidecar usable.
        assert_eq!(fail.call(&json!({})).await.unwrap_err(), "bad input");

        let err = loader.load_function(&artifact, "absent").await.err().unwrap();
        assert!(err.to_string().contains("not a function"));
    }

    #[tokio::test]
    async fn static_loader_matches_file_name() {
        let loader = StaticArtifactLoader::new().with_function("index.js", "double", |input| {
            input["x"]
                .as_i64()
                .map(|x| json!(x.saturating_mul(2)))
                .ok_or_else(|| "x must be an integer".to_string())
        });

        let f = loader
            .load_function(Path::new("/cache/ko1/src/index.js"), "double")
            .await
            .unwrap();
        assert_eq!(f.call(&json!({"x": 21})).await.unwrap(), json!(42));
        assert!(f.call(&json!({})).await.is_err());
        assert!(
            loader
                .load_function(Path::new("/cache/ko1/src/other.js"), "double")
                .await
                .is_err()
        );
    }
}
