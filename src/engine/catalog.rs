use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Create or replace a hotel record.
    pub async fn define_hotel(&self, hotel: Hotel) -> Result<Hotel, EngineError> {
        validate_name(&hotel.name)?;
        validate_currency(&hotel.currency)?;
        let max_minutes = (MAX_HOLD_WINDOW_MS / MINUTE_MS) as u32;
        for minutes in [hotel.online_hold_minutes, hotel.pay_at_hotel_hold_minutes].into_iter().flatten() {
            if minutes == 0 || minutes > max_minutes {
                return Err(EngineError::LimitExceeded("hold window out of range"));
            }
        }

        let _gate = self.commit_gate.read().await;
        self.wal_append(Event::HotelDefined { hotel: hotel.clone() }).await?;
        self.hotels.insert(hotel.id, hotel.clone());
        Ok(hotel)
    }

    /// Create or replace a room type. Its hotel must exist.
    pub async fn define_room_type(&self, room_type: RoomType) -> Result<RoomType, EngineError> {
        if !self.hotels.contains_key(&room_type.hotel_id) {
            return Err(EngineError::HotelNotFound(room_type.hotel_id));
        }
        validate_name(&room_type.name)?;
        validate_currency(&room_type.currency)?;
        if room_type.nightly_rate_cents > MAX_NIGHTLY_RATE_CENTS {
            return Err(EngineError::LimitExceeded("nightly rate too high"));
        }

        let _gate = self.commit_gate.read().await;
        self.wal_append(Event::RoomTypeDefined {
            room_type: room_type.clone(),
        })
        .await?;
        self.room_types.insert(room_type.id, room_type.clone());
        Ok(room_type)
    }

    pub fn hotel(&self, id: Ulid) -> Option<Hotel> {
        self.hotels.get(&id).map(|h| h.value().clone())
    }

    pub fn room_type(&self, id: Ulid) -> Option<RoomType> {
        self.room_types.get(&id).map(|rt| rt.value().clone())
    }
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidRequest("name is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_currency(currency: &str) -> Result<(), EngineError> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(EngineError::InvalidRequest("currency must be a 3-letter code"));
    }
    Ok(())
}
