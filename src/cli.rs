use std::{
    fmt::{self, Display},
    future::Future,
    path::PathBuf,
    process::Stdio,
    sync::Arc,
};

use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, trace};

use crate::{config::Config, Error, Result};

/// A single CLI call: the argument list (verb first) and optional stdin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn verb(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Value following `flag`, if the flag was passed.
    pub fn flag(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|index| self.args.get(index + 1))
            .map(String::as_str)
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

/// Runs one CLI invocation and returns its stdout.
pub trait Executor: Send + Sync + 'static {
    /// Run the invocation, returning its standard output.
    fn execute(&self, invocation: &Invocation) -> impl Future<Output = Result<String>> + Send;
}

/// Runs invocations through a real cluster CLI binary.
#[derive(Debug, Clone)]
pub struct Oc {
    binary: PathBuf,
    kubeconfig: Option<PathBuf>,
}

impl Oc {
    pub fn new(config: &Config) -> Self {
        Oc {
            binary: config.oc_binary.clone(),
            kubeconfig: config.kubeconfig.clone(),
        }
    }
}

impl Executor for Oc {
    async fn execute(&self, invocation: &Invocation) -> Result<String> {
        let mut command = Command::new(&self.binary);

        if let Some(kubeconfig) = &self.kubeconfig {
            command.arg("--kubeconfig").arg(kubeconfig);
        }

        command
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(Error::Spawn)?;

        if let (Some(input), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(Error::Spawn)?;
            // Dropping stdin closes the pipe so the CLI sees EOF.
        }

        let output = child.wait_with_output().await.map_err(Error::Spawn)?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            trace!("{} failed: {stderr}", invocation);
            return Err(classify_failure(invocation, stderr, output.status.code()));
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

fn classify_failure(invocation: &Invocation, stderr: String, code: Option<i32>) -> Error {
    if stderr.contains("NotFound") || stderr.contains("not found") {
        Error::NotFound {
            resource: invocation
                .args
                .iter()
                .skip(1)
                .take(2)
                .cloned()
                .collect::<Vec<_>>()
                .join("/"),
            stderr,
        }
    } else {
        Error::Cli {
            command: invocation.to_string(),
            stderr,
            code,
        }
    }
}

/// Cheaply clonable handle to an [`Executor`], from which commands are built.
#[derive(Debug)]
pub struct Cli<E> {
    executor: Arc<E>,
    artifact_dir: PathBuf,
}

impl<E> Clone for Cli<E> {
    fn clone(&self) -> Self {
        Cli {
            executor: self.executor.clone(),
            artifact_dir: self.artifact_dir.clone(),
        }
    }
}

impl Cli<Oc> {
    pub fn from_config(config: &Config) -> Self {
        Cli::new(Oc::new(config)).with_artifact_dir(config.artifact_dir())
    }
}

impl<E: Executor> Cli<E> {
    pub fn new(executor: E) -> Self {
        Cli {
            executor: Arc::new(executor),
            artifact_dir: std::env::temp_dir(),
        }
    }

    pub fn with_artifact_dir(mut self, artifact_dir: PathBuf) -> Self {
        self.artifact_dir = artifact_dir;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Start building a command for `verb`, e.g. `get`, `patch` or `delete`.
    pub fn run(&self, verb: &str) -> CommandBuilder<'_, E> {
        CommandBuilder {
            cli: self,
            invocation: Invocation {
                args: vec![verb.to_string()],
                stdin: None,
            },
        }
    }
}

#[must_use = "commands do nothing until run with output(), execute() or output_to_file()"]
pub struct CommandBuilder<'a, E> {
    cli: &'a Cli<E>,
    invocation: Invocation,
}

impl<'a, E: Executor> CommandBuilder<'a, E> {
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.invocation.args.push(arg.into());
        self
    }

    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.invocation.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.invocation.stdin = Some(input.into());
        self
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub async fn output(self) -> Result<String> {
        debug!("running {}", self.invocation);
        self.cli.executor.execute(&self.invocation).await
    }

    pub async fn execute(self) -> Result<()> {
        self.output().await.map(|_| ())
    }

    /// Run the command and store its output under the artifact directory,
    /// returning the path written.
    pub async fn output_to_file(self, name: &str) -> Result<PathBuf> {
        let path = self.cli.artifact_dir.join(format!(
            "{name}-{}.out",
            time::OffsetDateTime::now_utc().unix_timestamp_nanos()
        ));
        let artifact_dir = self.cli.artifact_dir.clone();

        let output = self.output().await?;

        tokio::fs::create_dir_all(&artifact_dir)
            .await
            .map_err(|source| Error::Io {
                path: artifact_dir.clone(),
                source,
            })?;
        tokio::fs::write(&path, output)
            .await
            .map_err(|source| Error::Io {
                path: path.clone(),
                source,
            })?;
        debug!("wrote command output to {}", path.display());

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_lookup() {
        let invocation = Invocation {
            args: ["patch", "mcp", "worker", "--type", "merge", "-p", "{}"]
                .map(String::from)
                .to_vec(),
            stdin: None,
        };

        assert_eq!(invocation.verb(), Some("patch"));
        assert_eq!(invocation.flag("--type"), Some("merge"));
        assert_eq!(invocation.flag("-p"), Some("{}"));
        assert_eq!(invocation.flag("-n"), None);
    }

    #[test]
    fn not_found_is_recognized() {
        let invocation = Invocation {
            args: ["get", "node", "worker-0"].map(String::from).to_vec(),
            stdin: None,
        };

        let err = classify_failure(
            &invocation,
            r#"Error from server (NotFound): nodes "worker-0" not found"#.to_string(),
            Some(1),
        );
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("node/worker-0"));

        let err = classify_failure(&invocation, "connection refused".to_string(), Some(1));
        assert!(matches!(err, Error::Cli { code: Some(1), .. }));
    }
}
