use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One correlated reply as reported by `request`.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyRecord {
    pub id: u64,
    pub session: String,
    pub elapsed_ms: u64,
    pub body: serde_json::Value,
}

pub fn print_replies(replies: &[ReplyRecord], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for reply in replies {
                println!(
                    "{}",
                    serde_json::to_string(reply).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            if replies.is_empty() {
                return;
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "SESSION", "ELAPSED", "BODY"]);
            for reply in replies {
                table.add_row(vec![
                    reply.id.to_string(),
                    reply.session.clone(),
                    format!("{}ms", reply.elapsed_ms),
                    body_preview(&reply.body),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for reply in replies {
                println!(
                    "id={} session={} elapsed={}ms body={}",
                    reply.id,
                    reply.session,
                    reply.elapsed_ms,
                    body_preview(&reply.body)
                );
            }
        }
    }
}

fn body_preview(body: &serde_json::Value) -> String {
    match body {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
