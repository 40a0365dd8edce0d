use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::engine::Engine;
use crate::limits::MAX_FRAME_LEN;
use crate::model::now_ms;
use crate::observability::command_label;
use crate::protocol::{parse_frame, Command, ProtocolError, Reply};
use crate::tenant::TenantManager;

/// Serve one client: one JSON request per line, one JSON reply per line,
/// in order. Bad requests get an error reply; the connection stays open.
pub async fn process_connection(socket: TcpStream, tenant_manager: Arc<TenantManager>) -> std::io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

    while let Some(line) = framed.next().await {
        let reply = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&tenant_manager, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => Reply::protocol_error(&ProtocolError::FrameTooLong),
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        framed.send(reply.to_line()).await.map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            LinesCodecError::MaxLineLengthExceeded => std::io::Error::other("reply too long"),
        })?;
    }
    Ok(())
}

/// Decode one request line, route it to its tenant and run it.
pub async fn handle_line(tenant_manager: &TenantManager, line: &str) -> Reply {
    let frame = match parse_frame(line) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!("rejected request: {e}");
            return Reply::protocol_error(&e);
        }
    };
    let engine = match tenant_manager.get_or_create(&frame.tenant) {
        Ok(engine) => engine,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
            return Reply::protocol_error(&ProtocolError::BadTenant(e.to_string()));
        }
        Err(e) => {
            tracing::warn!("tenant {:?} unavailable: {e}", frame.tenant);
            return Reply::protocol_error(&ProtocolError::Tenant(e.to_string()));
        }
    };

    let label = command_label(&frame.command);
    let start = Instant::now();
    let reply = execute(&engine, frame.command).await;
    metrics::histogram!(crate::observability::COMMAND_DURATION_SECONDS, "command" => label)
        .record(start.elapsed().as_secs_f64());
    metrics::counter!(
        crate::observability::COMMANDS_TOTAL,
        "command" => label,
        "status" => reply.status().to_string()
    )
    .increment(1);
    reply
}

pub async fn execute(engine: &Engine, cmd: Command) -> Reply {
    let now = now_ms();
    let result = match cmd {
        Command::CreateReservation(request) => engine.create_reservation(request, now).await.map(Reply::ok),
        Command::ConfirmReservation { reservation_id } => {
            engine.confirm_reservation(reservation_id, now).await.map(Reply::ok)
        }
        Command::CancelReservation { reservation_id } => {
            engine.cancel_reservation(reservation_id, now).await.map(Reply::ok)
        }
        Command::CheckIn { reservation_id } => engine.check_in(reservation_id, now).await.map(Reply::ok),
        Command::CheckOut { reservation_id } => engine.check_out(reservation_id, now).await.map(Reply::ok),
        Command::MarkNoShow { reservation_id } => engine.mark_no_show(reservation_id, now).await.map(Reply::ok),
        Command::GetReservation { reservation_id } => engine.get_reservation(reservation_id).map(Reply::ok),
        Command::GetFolio { folio_id } => engine.get_folio(folio_id).map(Reply::ok),
        Command::DefineHotel(spec) => {
            let hotel = match spec.into_hotel() {
                Ok(hotel) => hotel,
                Err(e) => return Reply::protocol_error(&e),
            };
            engine.define_hotel(hotel).await.map(|h| {
                Reply::ok(json!({
                    "id": h.id,
                    "name": h.name,
                    "currency": h.currency,
                    "taxRate": h.tax_rate.as_fraction(),
                    "onlineHoldMinutes": h.online_hold_minutes,
                    "payAtHotelHoldMinutes": h.pay_at_hotel_hold_minutes,
                }))
            })
        }
        Command::DefineRoomType(spec) => engine.define_room_type(spec.into_room_type()).await.map(Reply::ok),
        Command::ProvisionInventory {
            room_type_id,
            from,
            to,
            total,
        } => engine
            .provision_inventory(room_type_id, from, to, total)
            .await
            .map(Reply::ok),
        Command::GetInventory { room_type_id, from, to } => engine.inventory(room_type_id, from, to).map(Reply::ok),
    };
    result.unwrap_or_else(|e| Reply::engine_error(&e))
}
