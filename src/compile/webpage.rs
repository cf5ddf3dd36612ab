//! Webpage compiler: serves a cloned Jekyll repository locally and
//! captures a headless-browser screenshot of the rendered site.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::compile::{CompilationInfo, CompilationResult, Compiler, CompilerProgress};
use crate::error::CompilationError;
use crate::fetch::ScrapeResult;

/// Browser viewport for captures.
#[derive(Debug, Clone, Copy)]
pub struct ScreenshotOptions {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1024,
        }
    }
}

/// Captures a rendered page as a PNG. Treated as a black box; the
/// production implementation drives a headless browser binary.
#[async_trait]
pub trait Screenshotter: Send + Sync {
    async fn capture(&self, url: &str, output_png: &Path) -> Result<(), CompilationError>;
}

/// Headless Chromium screenshotter.
pub struct ChromiumScreenshotter {
    binary: String,
    options: ScreenshotOptions,
    timeout: Duration,
}

impl ChromiumScreenshotter {
    pub fn new(binary: impl Into<String>, options: ScreenshotOptions, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            options,
            timeout,
        }
    }
}

#[async_trait]
impl Screenshotter for ChromiumScreenshotter {
    async fn capture(&self, url: &str, output_png: &Path) -> Result<(), CompilationError> {
        let mut child = tokio::process::Command::new(&self.binary)
            .arg("--headless=new")
            .arg("--hide-scrollbars")
            .arg("--disable-gpu")
            .arg(format!(
                "--window-size={},{}",
                self.options.width, self.options.height
            ))
            .arg(format!("--screenshot={}", output_png.display()))
            .arg(url)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CompilationError::RenderFailed(format!("browser: {e}")))?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(CompilationError::RenderFailed(format!(
                "browser exited with {status}"
            ))),
            Ok(Err(e)) => Err(CompilationError::Io(e)),
            Err(_) => {
                let _ = child.kill().await;
                Err(CompilationError::Timeout {
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// A `jekyll serve` child process bound to one repository.
pub struct JekyllServer {
    child: tokio::process::Child,
    port: u16,
}

impl JekyllServer {
    /// Spawn the server and wait until it accepts connections.
    pub async fn start(
        repo_path: &Path,
        port: u16,
        timeout: Duration,
    ) -> Result<Self, CompilationError> {
        let child = tokio::process::Command::new("jekyll")
            .arg("serve")
            .arg("--source")
            .arg(repo_path)
            .arg("--port")
            .arg(port.to_string())
            .arg("--no-watch")
            .current_dir(repo_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CompilationError::ServerFailed(format!("jekyll: {e}")))?;

        let mut server = Self { child, port };
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                return Ok(server);
            }
            if let Ok(Some(status)) = server.child.try_wait() {
                return Err(CompilationError::ServerFailed(format!(
                    "jekyll exited with {status} before serving"
                )));
            }
            if tokio::time::Instant::now() >= deadline {
                server.stop().await;
                return Err(CompilationError::ServerFailed(format!(
                    "jekyll did not accept connections within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub async fn stop(&mut self) {
        let _ = self.child.kill().await;
    }
}

/// Compiles cloned GitHub Pages repositories into screenshots.
pub struct WebpageCompiler {
    /// Output category; the repository's primary language.
    category: String,
    port: u16,
    timeout: Duration,
    screenshotter: Box<dyn Screenshotter>,
}

impl WebpageCompiler {
    pub fn new(
        category: impl Into<String>,
        port: u16,
        timeout: Duration,
        screenshotter: Box<dyn Screenshotter>,
    ) -> Self {
        Self {
            category: category.into(),
            port,
            timeout,
            screenshotter,
        }
    }
}

#[async_trait]
impl Compiler for WebpageCompiler {
    async fn compile(
        &self,
        data_path: &Path,
        destination_path: &Path,
        scrape_result: Option<&ScrapeResult>,
        _progress: &CompilerProgress,
    ) -> Result<(Vec<CompilationResult>, CompilationInfo), CompilationError> {
        if !data_path.is_dir() {
            return Err(CompilationError::NotADirectory(data_path.to_path_buf()));
        }

        let instance_name = scrape_result
            .map(|r| r.instance_name.clone())
            .unwrap_or_else(|| "page".to_string());

        let mut server = JekyllServer::start(data_path, self.port, self.timeout).await?;
        let url = server.url();

        let image_path = destination_path.join(format!("{instance_name}.png"));
        let capture = self.screenshotter.capture(&url, &image_path).await;
        server.stop().await;
        capture?;

        if !image_path.exists() {
            return Err(CompilationError::RenderFailed(
                "screenshot produced no file".to_string(),
            ));
        }

        let mut info = CompilationInfo::new();
        info.insert("url".to_string(), Value::from(url));

        let result = CompilationResult {
            rendering_path: image_path,
            category: self.category.clone(),
            data_path: Some(data_path.to_path_buf()),
            text: None,
            assets_path: Vec::new(),
        };
        Ok((vec![result], info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn non_directory_input_is_an_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        struct NopShot;
        #[async_trait]
        impl Screenshotter for NopShot {
            async fn capture(&self, _: &str, _: &Path) -> Result<(), CompilationError> {
                Ok(())
            }
        }

        let compiler = WebpageCompiler::new(
            "html",
            4000,
            Duration::from_secs(5),
            Box::new(NopShot),
        );
        let err = compiler
            .compile(&file, dir.path(), None, &CompilerProgress::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CompilationError::NotADirectory(_)));
    }
}
