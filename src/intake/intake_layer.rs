// Intake layer - drives the content service from a JSON-lines stream.
// In the shipped binary that stream is stdin/stdout.

#[path = "commands.rs"]
pub mod commands;

use crate::core::content::{ContentService, ContentStore};
use crate::core::moderation::{DispositionSink, TextClassifier};
use commands::{parse_command, Command, Reply};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Read commands until EOF, writing one reply line per non-empty input line.
pub async fn run<S, C, R, W>(
    service: &ContentService<S, C>,
    input: R,
    mut output: W,
) -> anyhow::Result<()>
where
    S: ContentStore + DispositionSink + 'static,
    C: TextClassifier + 'static,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match parse_command(line) {
            Ok(command) => dispatch(service, command).await,
            Err(reply) => reply,
        };

        let mut encoded = serde_json::to_vec(&reply)?;
        encoded.push(b'\n');
        output.write_all(&encoded).await?;
        output.flush().await?;
    }
    Ok(())
}

pub async fn dispatch<S, C>(service: &ContentService<S, C>, command: Command) -> Reply
where
    S: ContentStore + DispositionSink + 'static,
    C: TextClassifier + 'static,
{
    tracing::debug!(?command, "Intake command");
    let result = match command {
        Command::SubmitPost {
            author_id,
            title,
            body,
            auto_reply,
        } => service
            .submit_post(author_id, title, body, auto_reply)
            .await
            .map(to_value),
        Command::SubmitComment {
            author_id,
            post_id,
            reply_to_id,
            body,
        } => service
            .submit_comment(author_id, post_id, reply_to_id, body)
            .await
            .map(to_value),
        Command::Edit {
            content_id,
            title,
            body,
        } => service.edit(content_id, title, body).await.map(to_value),
        Command::Delete { content_id } => service
            .delete(content_id)
            .await
            .map(|()| json!({ "content_id": content_id, "deleted": true })),
        Command::Remoderate { content_id } => {
            service.remoderate(content_id).await.map(to_value)
        }
        Command::Disposition { content_id } => service
            .get_disposition(content_id)
            .await
            .map(|d| json!({ "content_id": content_id, "disposition": d })),
        Command::Get { content_id } => service.get(content_id).await.map(to_value),
        Command::CommentStats { from, to } => {
            service.comment_stats(from, to).await.map(to_value)
        }
    };

    match result {
        Ok(data) => Reply::ok(data),
        Err(err) => {
            tracing::warn!("Intake command failed: {}", err);
            Reply::from_error(&err)
        }
    }
}

fn to_value<T: Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
