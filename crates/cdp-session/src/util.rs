use anyhow::{anyhow, Result};
use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

const WS_URL_WAIT: Duration = Duration::from_secs(20);

/// Scrape the DevTools websocket URL from the browser's stderr.
///
/// Chromium announces the endpoint as `DevTools listening on ws://...` once
/// the debugging socket is up.
pub async fn extract_ws_url(child: &mut Child) -> Result<String> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("chromium process missing stderr handle"))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut seen = Vec::new();

    let scrape = async {
        while let Some(line) = lines.next().await {
            let line = line?;
            if let Some((_, ws)) = line.rsplit_once("listening on ") {
                let ws = ws.trim();
                if ws.starts_with("ws") && ws.contains("devtools/browser") {
                    return Ok(ws.to_string());
                }
            }
            if seen.len() < 8 {
                seen.push(line);
            }
        }
        Err(anyhow!(
            "chromium exited before exposing a devtools websocket url. stderr: {}",
            seen.join(" | ")
        ))
    };

    timeout(WS_URL_WAIT, scrape)
        .await
        .map_err(|_| anyhow!("timed out waiting for the devtools websocket url"))?
}
