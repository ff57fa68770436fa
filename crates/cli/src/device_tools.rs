//! Device actions the terminal client offers the gateway.

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    serde_json::{Map, Value, json},
    tether_client::ToolHandler,
    tracing::info,
};

pub struct DeviceTools;

#[async_trait]
impl ToolHandler for DeviceTools {
    async fn handle(&self, action: &str, params: Option<&Map<String, Value>>) -> Result<String> {
        info!(action, "device tool invoked");
        match action {
            "device_info" => Ok(json!({
                "os": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "client": concat!("tether/", env!("CARGO_PKG_VERSION")),
            })
            .to_string()),
            "clock" => Ok(chrono::Local::now().to_rfc3339()),
            "echo" => {
                let Some(text) = params.and_then(|p| p.get("text")).and_then(Value::as_str) else {
                    bail!("echo needs a 'text' parameter");
                };
                Ok(text.to_string())
            },
            other => bail!("unsupported action '{other}'"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_returns_text_param() {
        let params = json!({ "text": "ping" });
        let out = DeviceTools
            .handle("echo", params.as_object())
            .await
            .unwrap();
        assert_eq!(out, "ping");
    }

    #[tokio::test]
    async fn echo_without_text_fails() {
        assert!(DeviceTools.handle("echo", None).await.is_err());
    }

    #[tokio::test]
    async fn device_info_is_json() {
        let out = DeviceTools.handle("device_info", None).await.unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["os"], std::env::consts::OS);
    }

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let err = DeviceTools.handle("launch_rocket", None).await.unwrap_err();
        assert!(err.to_string().contains("launch_rocket"));
    }
}
