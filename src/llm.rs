use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::{LlmConfig, LlmProvider};
use crate::error::Upstream;
use crate::util::truncate_chars;

const ERROR_BODY_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Black-box text completion. The returned text is untrusted: it may be empty,
/// fenced, or not JSON at all.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn CompletionClient>> {
    match config.provider {
        LlmProvider::Command => Ok(Arc::new(CommandCompletionClient::new(config)?)),
        LlmProvider::OpenaiCompatible => Ok(Arc::new(OpenAiCompatibleClient::new(config)?)),
    }
}

/// Runs an external program with the prompt on stdin and reads the completion
/// from stdout.
pub struct CommandCompletionClient {
    program: String,
    args: Vec<String>,
}

impl CommandCompletionClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let program = config.command.trim();
        if program.is_empty() {
            bail!("llm.command must not be empty for the command provider");
        }
        Ok(Self {
            program: program.to_string(),
            args: config.args.clone(),
        })
    }
}

impl CompletionClient for CommandCompletionClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn LLM command '{}'", self.program))
            .context(Upstream::Llm)?;

        let prompt = format!(
            "{}\n\n{}",
            request.system_prompt.trim(),
            request.user_prompt.trim()
        );
        let stdin = child.stdin.take();
        // prompt is written while stdout and stderr are drained
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || -> std::io::Result<()> {
                match stdin {
                    Some(mut stdin) => stdin.write_all(prompt.as_bytes()),
                    None => Ok(()),
                }
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("prompt writer panicked")));
            (written, output)
        });

        let output = output
            .context("failed to wait for LLM command")
            .context(Upstream::Llm)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "LLM command '{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ))
            .context(Upstream::Llm);
        }
        // broken pipe: the command finished without reading all of the prompt
        if let Err(write_error) = written {
            if write_error.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(write_error)
                    .context("failed to write prompt to LLM command")
                    .context(Upstream::Llm);
            }
        }

        debug!(program = %self.program, bytes = output.stdout.len(), "LLM command completed");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatibleClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key_env: String,
    temperature: f64,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            bail!("llm.model must not be empty for the openai_compatible provider");
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .context("failed to build LLM HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.trim().to_string(),
            api_key_env: config.api_key_env.clone(),
            temperature: config.temperature,
        })
    }
}

impl CompletionClient for OpenAiCompatibleClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system_prompt.trim() },
                { "role": "user", "content": request.user_prompt.trim() }
            ],
            "temperature": self.temperature
        });

        let mut call = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = std::env::var(&self.api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            call = call.bearer_auth(api_key);
        }

        let response = call
            .send()
            .with_context(|| format!("failed to call {}", self.endpoint))
            .context(Upstream::Llm)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!(
                "LLM endpoint returned {status}: {}",
                truncate_chars(body.trim(), ERROR_BODY_PREVIEW_CHARS)
            ))
            .context(Upstream::Llm);
        }

        let payload: Value = response
            .json()
            .with_context(|| format!("LLM endpoint returned a non-JSON envelope with {status}"))
            .context(Upstream::Llm)?;
        Ok(completion_text(&payload))
    }
}

/// Assistant content from a chat-completions envelope; empty when absent so the
/// theme parser reports it.
fn completion_text(payload: &Value) -> String {
    payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::upstream_of;

    #[test]
    fn completion_text_reads_first_choice() {
        let payload = json!({
            "choices": [{ "message": { "role": "assistant", "content": "[]" } }]
        });
        assert_eq!(completion_text(&payload), "[]");
        assert_eq!(completion_text(&json!({ "choices": [] })), "");
    }

    #[test]
    fn command_client_rejects_blank_program() {
        let config = LlmConfig {
            provider: LlmProvider::Command,
            command: "  ".to_string(),
            ..LlmConfig::default()
        };
        assert!(CommandCompletionClient::new(&config).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_client_returns_stdout() {
        let config = LlmConfig {
            provider: LlmProvider::Command,
            command: "cat".to_string(),
            ..LlmConfig::default()
        };
        let client = CommandCompletionClient::new(&config).expect("client should build");
        let text = client
            .complete(&CompletionRequest {
                system_prompt: "system".to_string(),
                user_prompt: "user".to_string(),
            })
            .expect("cat should echo the prompt");
        assert_eq!(text, "system\n\nuser");
    }

    #[cfg(unix)]
    #[test]
    fn command_failure_is_tagged_as_llm_upstream() {
        let config = LlmConfig {
            provider: LlmProvider::Command,
            command: "false".to_string(),
            ..LlmConfig::default()
        };
        let client = CommandCompletionClient::new(&config).expect("client should build");
        let error = client
            .complete(&CompletionRequest {
                system_prompt: String::new(),
                user_prompt: String::new(),
            })
            .expect_err("false should fail");
        assert_eq!(upstream_of(&error), Some(Upstream::Llm));
    }

    #[cfg(unix)]
    #[test]
    fn command_output_larger_than_a_pipe_does_not_stall_the_prompt() {
        let config = LlmConfig {
            provider: LlmProvider::Command,
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "head -c 200000 /dev/zero; cat > /dev/null".to_string(),
            ],
            ..LlmConfig::default()
        };
        let client = CommandCompletionClient::new(&config).expect("client should build");
        let text = client
            .complete(&CompletionRequest {
                system_prompt: "system".to_string(),
                user_prompt: "x".repeat(1_000_000),
            })
            .expect("command should finish");
        assert_eq!(text.len(), 200_000);
    }

    /// Serves one canned HTTP response after reading the full request.
    fn serve_once(response: String) -> (String, std::thread::JoinHandle<()>) {
        use std::io::Read;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let address = listener.local_addr().expect("listener address");
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("client should connect");
            let mut request = Vec::<u8>::new();
            let mut buffer = [0u8; 4096];
            loop {
                let read = stream.read(&mut buffer).expect("request should be readable");
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buffer[..read]);
                let text = String::from_utf8_lossy(&request);
                let Some(header_end) = text.find("\r\n\r\n") else {
                    continue;
                };
                let content_length = text[..header_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= header_end + 4 + content_length {
                    break;
                }
            }
            stream
                .write_all(response.as_bytes())
                .expect("response should be written");
        });
        (format!("http://{address}"), handle)
    }

    #[test]
    fn http_error_status_is_reported_before_parsing_the_body() {
        let body = "<html><body>bad gateway</body></html>";
        let (base_url, server) = serve_once(format!(
            "HTTP/1.1 502 Bad Gateway\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ));
        let config = LlmConfig {
            provider: LlmProvider::OpenaiCompatible,
            base_url,
            model: "test-model".to_string(),
            ..LlmConfig::default()
        };
        let client = OpenAiCompatibleClient::new(&config).expect("client should build");

        let error = client
            .complete(&CompletionRequest {
                system_prompt: "system".to_string(),
                user_prompt: "user".to_string(),
            })
            .expect_err("502 should fail");
        server.join().expect("server thread should not panic");

        let detail = format!("{error:#}");
        assert!(detail.contains("502"), "status missing from: {detail}");
        assert!(detail.contains("bad gateway"), "body missing from: {detail}");
        assert!(!detail.contains("non-JSON"));
        assert_eq!(upstream_of(&error), Some(Upstream::Llm));
    }
}
