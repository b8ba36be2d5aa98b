use tokio::io::{AsyncWriteExt, BufReader};

use crate::error::{AppError, AppResult, DistributedError};
use crate::phase::PhaseStatus;

use super::io::MAX_MESSAGE_BYTES;
use super::{
    PhaseChangeMessage, PhaseCommand, PhaseControlMessage, WireMessage, read_message,
    send_message,
};

#[tokio::test(flavor = "current_thread")]
async fn messages_cross_a_duplex_stream() -> AppResult<()> {
    let (client, server) = tokio::io::duplex(4096);
    let (_, mut client_writer) = tokio::io::split(client);
    let (server_reader, _) = tokio::io::split(server);
    let mut reader = BufReader::new(server_reader);

    send_message(
        &mut client_writer,
        &WireMessage::PhaseControl(PhaseControlMessage {
            command: PhaseCommand::TryTerminate,
            run_id: "0001".to_owned(),
            phase: "steady".to_owned(),
        }),
    )
    .await?;
    send_message(
        &mut client_writer,
        &WireMessage::PhaseChange(PhaseChangeMessage {
            sender_id: "agent-1".to_owned(),
            run_id: "0001".to_owned(),
            phase: "steady".to_owned(),
            status: PhaseStatus::Finished,
            successful: true,
            session_limit_exceeded: false,
            error: None,
        }),
    )
    .await?;

    let first = read_message(&mut reader).await?;
    if !matches!(&first, WireMessage::PhaseControl(message) if message.command == PhaseCommand::TryTerminate)
    {
        return Err(AppError::distributed(format!(
            "Unexpected message {}",
            first.kind()
        )));
    }
    let second = read_message(&mut reader).await?;
    if !matches!(&second, WireMessage::PhaseChange(message)
            if message.status == PhaseStatus::Finished && message.successful)
    {
        return Err(AppError::distributed(format!(
            "Unexpected message {}",
            second.kind()
        )));
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn wire_format_uses_tagged_json() -> AppResult<()> {
    let (client, server) = tokio::io::duplex(4096);
    let (_, mut writer) = tokio::io::split(client);
    let (reader, _) = tokio::io::split(server);
    let mut reader = BufReader::new(reader);

    writer
        .write_all(b"{\"type\":\"phase_control\",\"command\":\"RUN\",\"run_id\":\"00A1\",\"phase\":\"p/000/a\"}\r\n")
        .await
        .map_err(|err| AppError::distributed(format!("write failed: {}", err)))?;
    let message = read_message(&mut reader).await?;
    if matches!(&message, WireMessage::PhaseControl(control)
            if control.command == PhaseCommand::Run && control.phase == "p/000/a")
    {
        return Ok(());
    }
    Err(AppError::distributed(format!(
        "Unexpected message {}",
        message.kind()
    )))
}

#[tokio::test(flavor = "current_thread")]
async fn oversized_frame_is_rejected() -> AppResult<()> {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (_, mut writer) = tokio::io::split(client);
    let (reader, _) = tokio::io::split(server);
    let mut reader = BufReader::new(reader);
    let writing = tokio::spawn(async move {
        let frame = vec![b'x'; MAX_MESSAGE_BYTES.saturating_add(16)];
        if writer.write_all(&frame).await.is_ok() {
            drop(writer.write_all(b"\n").await);
        }
    });
    let result = read_message(&mut reader).await;
    writing.abort();
    match result {
        Err(AppError::Distributed(DistributedError::WireMessageTooLarge { max_bytes }))
            if max_bytes == MAX_MESSAGE_BYTES =>
        {
            Ok(())
        }
        Err(err) => Err(AppError::distributed(format!("Unexpected error {}", err))),
        Ok(message) => Err(AppError::distributed(format!(
            "Unexpected message {}",
            message.kind()
        ))),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn closed_stream_reports_connection_closed() -> AppResult<()> {
    let (client, server) = tokio::io::duplex(64);
    drop(client);
    let (reader, _) = tokio::io::split(server);
    let mut reader = BufReader::new(reader);
    match read_message(&mut reader).await {
        Err(AppError::Distributed(DistributedError::ConnectionClosed)) => Ok(()),
        Err(err) => Err(AppError::distributed(format!("Unexpected error {}", err))),
        Ok(message) => Err(AppError::distributed(format!(
            "Unexpected message {}",
            message.kind()
        ))),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn malformed_line_is_a_deserialize_error() -> AppResult<()> {
    let (client, server) = tokio::io::duplex(256);
    let (_, mut writer) = tokio::io::split(client);
    let (reader, _) = tokio::io::split(server);
    let mut reader = BufReader::new(reader);
    writer
        .write_all(b"{\"type\":\"unknown\"}\n")
        .await
        .map_err(|err| AppError::distributed(format!("write failed: {}", err)))?;
    match read_message(&mut reader).await {
        Err(AppError::Distributed(DistributedError::Deserialize { .. })) => Ok(()),
        Err(err) => Err(AppError::distributed(format!("Unexpected error {}", err))),
        Ok(message) => Err(AppError::distributed(format!(
            "Unexpected message {}",
            message.kind()
        ))),
    }
}
