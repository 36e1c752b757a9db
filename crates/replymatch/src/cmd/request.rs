use std::sync::Arc;
use std::time::Instant;

use replymatch::{Envelope, EnvelopeCodec, EnvelopeStage, MatchError};
use replymatch_peer::{connect_with_config, ConnectionConfig};
use tracing::{debug, warn};

use crate::cmd::{parse_duration, RequestArgs};
use crate::exit::{match_error, peer_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_replies, OutputFormat, ReplyRecord};

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let body = resolve_body(&args)?;

    let stage = Arc::new(EnvelopeStage::new(EnvelopeCodec));
    let config = ConnectionConfig::default().with_request_timeout(timeout);
    let conn = connect_with_config(&args.path, stage, config)
        .map_err(|err| peer_error("connect failed", err))?;
    let session = conn.session_id().to_string();

    // Issue everything first so the replies race each other.
    let started = Instant::now();
    let mut waiting = Vec::new();
    for id in 1..=args.count {
        let completion = conn
            .request(Envelope::request(id, body.clone()))
            .map_err(|err| peer_error("request failed", err))?;
        waiting.push((id, completion));
    }
    debug!(%session, count = args.count, "requests sent");

    let mut replies = Vec::new();
    let mut timed_out = 0u64;
    for (id, completion) in waiting {
        match completion.wait() {
            Ok(reply) => replies.push(ReplyRecord {
                id: reply.id,
                session: session.clone(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                body: reply.body,
            }),
            Err(MatchError::Timeout(_)) => {
                warn!(%session, id, "no reply in time");
                timed_out += 1;
            }
            Err(err) => return Err(match_error(&format!("request {id} failed"), err)),
        }
    }

    print_replies(&replies, format);
    if timed_out > 0 {
        return Err(CliError::new(
            TIMEOUT,
            format!(
                "{timed_out} of {} requests timed out after {timeout:?}",
                args.count
            ),
        ));
    }
    Ok(SUCCESS)
}

fn resolve_body(args: &RequestArgs) -> CliResult<serde_json::Value> {
    if let Some(json) = &args.json {
        return serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")));
    }
    Ok(args
        .data
        .clone()
        .map_or(serde_json::Value::Null, serde_json::Value::String))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;

    fn args(json: Option<&str>, data: Option<&str>) -> RequestArgs {
        RequestArgs {
            path: PathBuf::from("/tmp/unused.sock"),
            json: json.map(str::to_string),
            data: data.map(str::to_string),
            count: 1,
            timeout: "5s".to_string(),
        }
    }

    #[test]
    fn body_sources() {
        assert_eq!(resolve_body(&args(Some(r#"{"a":[1]}"#), None)).unwrap(), json!({"a": [1]}));
        assert_eq!(resolve_body(&args(None, Some("hi"))).unwrap(), json!("hi"));
        assert_eq!(resolve_body(&args(None, None)).unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn invalid_json_is_usage_error() {
        let err = resolve_body(&args(Some("{nope"), None)).unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}
