//! Newline-delimited JSON request/reply format.
//!
//! Request: `{"tenant": "...", "op": "<operation>", ...fields}`.
//! Reply: `{"status": 200, "result": ...}` or
//! `{"status": <code>, "error": "<Kind>", "message": "..."}`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{BookingRequest, Hotel, RoomType, TaxRate};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Command {
    CreateReservation(BookingRequest),
    ConfirmReservation { reservation_id: Ulid },
    CancelReservation { reservation_id: Ulid },
    CheckIn { reservation_id: Ulid },
    CheckOut { reservation_id: Ulid },
    MarkNoShow { reservation_id: Ulid },
    GetReservation { reservation_id: Ulid },
    GetFolio { folio_id: Ulid },
    DefineHotel(HotelSpec),
    DefineRoomType(RoomTypeSpec),
    ProvisionInventory {
        room_type_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        total: u32,
    },
    GetInventory {
        room_type_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
}

/// Hotel as sent by clients: the tax rate is a fraction (`0.18`) and the
/// id is assigned when absent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotelSpec {
    #[serde(default)]
    pub id: Option<Ulid>,
    pub name: String,
    pub currency: String,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub online_hold_minutes: Option<u32>,
    #[serde(default)]
    pub pay_at_hotel_hold_minutes: Option<u32>,
}

impl HotelSpec {
    pub fn into_hotel(self) -> Result<Hotel, ProtocolError> {
        let tax_rate = TaxRate::from_fraction(self.tax_rate).ok_or(ProtocolError::InvalidField("taxRate"))?;
        Ok(Hotel {
            id: self.id.unwrap_or_else(Ulid::new),
            name: self.name,
            currency: self.currency.to_ascii_uppercase(),
            tax_rate,
            online_hold_minutes: self.online_hold_minutes,
            pay_at_hotel_hold_minutes: self.pay_at_hotel_hold_minutes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomTypeSpec {
    #[serde(default)]
    pub id: Option<Ulid>,
    pub hotel_id: Ulid,
    pub name: String,
    pub nightly_rate_cents: u64,
    pub currency: String,
}

impl RoomTypeSpec {
    pub fn into_room_type(self) -> RoomType {
        RoomType {
            id: self.id.unwrap_or_else(Ulid::new),
            hotel_id: self.hotel_id,
            name: self.name,
            nightly_rate_cents: self.nightly_rate_cents,
            currency: self.currency.to_ascii_uppercase(),
        }
    }
}

/// One decoded request line.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub tenant: String,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Json(String),
    NotAnObject,
    MissingTenant,
    BadCommand(String),
    InvalidField(&'static str),
    /// Tenant name rejected: empty, too long, or not path-safe.
    BadTenant(String),
    /// Tenant engine could not be opened.
    Tenant(String),
    FrameTooLong,
}

impl ProtocolError {
    pub fn status_code(&self) -> u16 {
        match self {
            ProtocolError::Tenant(_) => 503,
            _ => 400,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::Tenant(_) => "TenantUnavailable",
            _ => "BadRequest",
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Json(e) => write!(f, "malformed JSON: {e}"),
            ProtocolError::NotAnObject => write!(f, "request must be a JSON object"),
            ProtocolError::MissingTenant => write!(f, "missing string field: tenant"),
            ProtocolError::BadCommand(e) => write!(f, "bad command: {e}"),
            ProtocolError::InvalidField(field) => write!(f, "invalid field: {field}"),
            ProtocolError::BadTenant(e) => write!(f, "bad tenant: {e}"),
            ProtocolError::Tenant(e) => write!(f, "tenant error: {e}"),
            ProtocolError::FrameTooLong => write!(f, "request line too long"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Split `tenant` off the request object and decode the rest by `op`.
pub fn parse_frame(line: &str) -> Result<Frame, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| ProtocolError::Json(e.to_string()))?;
    let serde_json::Value::Object(mut fields) = value else {
        return Err(ProtocolError::NotAnObject);
    };
    let tenant = match fields.remove("tenant") {
        Some(serde_json::Value::String(tenant)) => tenant,
        _ => return Err(ProtocolError::MissingTenant),
    };
    let command = serde_json::from_value(serde_json::Value::Object(fields))
        .map_err(|e| ProtocolError::BadCommand(e.to_string()))?;
    Ok(Frame { tenant, command })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Ok {
        status: u16,
        result: serde_json::Value,
    },
    Err {
        status: u16,
        error: String,
        message: String,
    },
}

impl Reply {
    pub fn ok(result: impl Serialize) -> Reply {
        match serde_json::to_value(result) {
            Ok(result) => Reply::Ok { status: 200, result },
            Err(e) => Reply::Err {
                status: 500,
                error: "Internal".into(),
                message: format!("could not encode result: {e}"),
            },
        }
    }

    pub fn engine_error(e: &EngineError) -> Reply {
        let body = e.to_body();
        Reply::Err {
            status: body.status,
            error: body.error,
            message: body.message,
        }
    }

    pub fn protocol_error(e: &ProtocolError) -> Reply {
        Reply::Err {
            status: e.status_code(),
            error: e.kind().into(),
            message: e.to_string(),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Reply::Ok { status, .. } | Reply::Err { status, .. } => *status,
        }
    }

    pub fn to_line(&self) -> String {
        // Reply holds only strings, numbers and JSON values; encoding cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"status":500,"error":"Internal","message":"encode failed"}"#.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PaymentStrategy;

    #[test]
    fn parses_create_reservation() {
        let hotel = Ulid::new();
        let line = format!(
            r#"{{"tenant":"acme","op":"create_reservation","idempotencyKey":"K","hotelId":"{hotel}",
            "roomTypeId":"{rt}","ratePlanId":"{rp}","checkIn":"2024-06-01","checkOut":"2024-06-03",
            "guests":2,"customer":{{"name":"Ana","email":"ana@example.com"}},"currency":"USD",
            "payment":{{"strategy":"online_intent","paymentIntentId":"pi_1"}}}}"#,
            rt = Ulid::new(),
            rp = Ulid::new(),
        )
        .replace('\n', "");
        let frame = parse_frame(&line).unwrap();
        assert_eq!(frame.tenant, "acme");
        match frame.command {
            Command::CreateReservation(req) => {
                assert_eq!(req.idempotency_key, "K");
                assert_eq!(req.hotel_id, hotel);
                assert_eq!(req.check_in, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
                assert_eq!(req.payment.strategy, PaymentStrategy::OnlineIntent);
                assert!(req.metadata.is_empty());
                assert_eq!(req.guest_breakdown, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_camel_case_fields() {
        let id = Ulid::new();
        let frame = parse_frame(&format!(r#"{{"tenant":"t","op":"confirm_reservation","reservationId":"{id}"}}"#)).unwrap();
        assert_eq!(frame.command, Command::ConfirmReservation { reservation_id: id });

        let frame = parse_frame(&format!(
            r#"{{"tenant":"t","op":"provision_inventory","roomTypeId":"{id}","from":"2024-06-01","to":"2024-07-01","total":12}}"#
        ))
        .unwrap();
        assert!(matches!(frame.command, Command::ProvisionInventory { total: 12, .. }));
    }

    #[test]
    fn hotel_spec_converts_tax_fraction() {
        let frame = parse_frame(r#"{"tenant":"t","op":"define_hotel","name":"Mar","currency":"usd","taxRate":0.18}"#).unwrap();
        let Command::DefineHotel(spec) = frame.command else {
            panic!("expected define_hotel");
        };
        let hotel = spec.into_hotel().unwrap();
        assert_eq!(hotel.tax_rate.ppm(), 180_000);
        assert_eq!(hotel.currency, "USD");

        let spec = HotelSpec {
            id: None,
            name: "x".into(),
            currency: "USD".into(),
            tax_rate: 1.5,
            online_hold_minutes: None,
            pay_at_hotel_hold_minutes: None,
        };
        assert_eq!(spec.into_hotel(), Err(ProtocolError::InvalidField("taxRate")));
    }

    #[test]
    fn rejects_bad_frames() {
        assert!(matches!(parse_frame("not json"), Err(ProtocolError::Json(_))));
        assert_eq!(parse_frame("[1,2]"), Err(ProtocolError::NotAnObject));
        assert_eq!(
            parse_frame(r#"{"op":"get_folio","folioId":"01HZZZZZZZZZZZZZZZZZZZZZZZ"}"#),
            Err(ProtocolError::MissingTenant)
        );
        assert!(matches!(
            parse_frame(r#"{"tenant":"t","op":"drop_everything"}"#),
            Err(ProtocolError::BadCommand(_))
        ));
        assert!(matches!(
            parse_frame(r#"{"tenant":"t","op":"confirm_reservation"}"#),
            Err(ProtocolError::BadCommand(_))
        ));
    }

    #[test]
    fn reply_shapes() {
        let ok = Reply::ok(serde_json::json!({"a": 1}));
        assert_eq!(ok.to_line(), r#"{"status":200,"result":{"a":1}}"#);

        let err = Reply::engine_error(&EngineError::SoldOut(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()));
        assert_eq!(err.status(), 409);
        let v: serde_json::Value = serde_json::from_str(&err.to_line()).unwrap();
        assert_eq!(v["error"], "SoldOut");
        assert_eq!(v["message"], "sold out on 2024-06-01");

        let bad = Reply::protocol_error(&ProtocolError::MissingTenant);
        assert_eq!(bad.status(), 400);
        assert!(bad.to_line().contains(r#""error":"BadRequest""#));
    }
}
