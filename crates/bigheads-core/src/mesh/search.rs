//! Chat search and export.

use std::path::PathBuf;

use crate::error::MeshError;
use crate::helpers::now_secs;
use crate::store::StoredMessage;

use super::engine::{Event, MeshEngine};

const SEARCH_SCAN_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Html,
}

impl MeshEngine {
    pub async fn search_chat(&self, chat_id: &str, term: &str) -> Result<Vec<StoredMessage>, MeshError> {
        let all = self.store_handle().get_chat_messages(chat_id, SEARCH_SCAN_LIMIT)?;
        if term.trim().is_empty() {
            return Ok(all);
        }
        let needle = term.to_lowercase();
        Ok(all
            .into_iter()
            .filter(|row| {
                let text = match &row.payload {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                text.to_lowercase().contains(&needle)
            })
            .collect())
    }

    pub async fn export_chat(
        &self,
        chat_id: &str,
        fmt: ExportFormat,
        export_dir: &std::path::Path,
    ) -> Result<PathBuf, MeshError> {
        let rows = self.store_handle().export_chat_json(chat_id)?;
        let ts = now_secs() as i64;
        std::fs::create_dir_all(export_dir).map_err(|e| MeshError::Config(e.to_string()))?;

        let out_path = match fmt {
            ExportFormat::Json => {
                let path = export_dir.join(format!("{chat_id}-{ts}.json"));
                let json = serde_json::to_string_pretty(&rows)?;
                std::fs::write(&path, json).map_err(|e| MeshError::Config(e.to_string()))?;
                path
            }
            ExportFormat::Html => {
                let path = export_dir.join(format!("{chat_id}-{ts}.html"));
                let mut html = String::from("<html><body><h1>BigHeads Export</h1><ul>");
                for row in &rows {
                    html.push_str(&format!(
                        "<li><b>{}</b> [{:.3}] : {}</li>",
                        row.sender, row.timestamp, row.payload
                    ));
                }
                html.push_str("</ul></body></html>");
                std::fs::write(&path, html).map_err(|e| MeshError::Config(e.to_string()))?;
                path
            }
        };

        let _ = self.event_sender().send(Event::Exported(out_path.clone())).await;
        Ok(out_path)
    }
}
