use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::{Ms, now_ms};

/// Background task that periodically releases expired holds.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        sweep_once(&engine, now_ms()).await;
    }
}

/// Expire every pending reservation whose hold has passed at `now`.
/// Returns how many this call released.
pub async fn sweep_once(engine: &Engine, now: Ms) -> usize {
    let mut released = 0;
    for id in engine.collect_expired(now) {
        match engine.expire_reservation(id, now).await {
            Ok(_) => {
                released += 1;
                info!("released expired hold of reservation {id}");
            }
            Err(e) => {
                // Confirmed or cancelled in the meantime; the other side won.
                tracing::debug!("sweeper skip {id}: {e}");
            }
        }
    }
    released
}

/// Background task that rewrites the WAL once enough appends piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::NaiveDate;
    use ulid::Ulid;

    use super::*;
    use crate::engine::EngineOptions;
    use crate::model::*;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staykeep_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    async fn engine_with_room(name: &str) -> (Arc<Engine>, Hotel, RoomType) {
        let engine = Arc::new(Engine::new(test_wal_path(name), EngineOptions::default()).unwrap());
        let hotel = engine
            .define_hotel(Hotel {
                id: Ulid::new(),
                name: "Hostal".into(),
                currency: "EUR".into(),
                tax_rate: TaxRate::ZERO,
                online_hold_minutes: None,
                pay_at_hotel_hold_minutes: None,
            })
            .await
            .unwrap();
        let room_type = engine
            .define_room_type(RoomType {
                id: Ulid::new(),
                hotel_id: hotel.id,
                name: "Single".into(),
                nightly_rate_cents: 5_000,
                currency: "EUR".into(),
            })
            .await
            .unwrap();
        engine.provision_inventory(room_type.id, d(1), d(30), 2).await.unwrap();
        (engine, hotel, room_type)
    }

    fn request(key: &str, hotel: &Hotel, room_type: &RoomType, strategy: PaymentStrategy) -> BookingRequest {
        BookingRequest {
            idempotency_key: key.into(),
            hotel_id: hotel.id,
            room_type_id: room_type.id,
            rate_plan_id: Ulid::nil(),
            check_in: d(3),
            check_out: d(5),
            guests: 1,
            guest_breakdown: None,
            customer: Customer {
                name: "Jon".into(),
                email: "jon@example.com".into(),
                phone: None,
            },
            currency: "EUR".into(),
            payment: PaymentInfo {
                strategy,
                payment_intent_id: None,
            },
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn sweep_releases_only_expired_holds() {
        let (engine, hotel, room_type) = engine_with_room("sweep_expired.wal").await;
        let now = 1_000_000;
        let online = engine
            .create_reservation(request("a", &hotel, &room_type, PaymentStrategy::OnlineIntent), now)
            .await
            .unwrap();
        let at_hotel = engine
            .create_reservation(request("b", &hotel, &room_type, PaymentStrategy::PayAtHotel), now)
            .await
            .unwrap();

        // Nothing is due yet.
        assert_eq!(sweep_once(&engine, now + 1).await, 0);

        // 20 minutes in, only the online-payment hold has run out.
        assert_eq!(sweep_once(&engine, online.hold_expires_at).await, 1);
        let r = engine.get_reservation(online.reservation_id).unwrap();
        assert_eq!(r.status, ReservationStatus::Cancelled);
        assert_eq!(r.cancel_reason, Some(CancelReason::Expired));
        let days = engine.inventory(room_type.id, d(3), d(5)).unwrap();
        assert!(days.iter().all(|day| day.holds == 1));

        assert_eq!(sweep_once(&engine, at_hotel.hold_expires_at).await, 1);
        let days = engine.inventory(room_type.id, d(3), d(5)).unwrap();
        assert!(days.iter().all(|day| day.holds == 0 && day.available == 2));

        // Running again is a no-op.
        assert_eq!(sweep_once(&engine, at_hotel.hold_expires_at + 1).await, 0);
    }

    #[tokio::test]
    async fn sweep_skips_confirmed() {
        let (engine, hotel, room_type) = engine_with_room("sweep_confirmed.wal").await;
        let now = 1_000_000;
        let receipt = engine
            .create_reservation(request("a", &hotel, &room_type, PaymentStrategy::OnlineIntent), now)
            .await
            .unwrap();
        engine.confirm_reservation(receipt.reservation_id, now + 1).await.unwrap();

        assert_eq!(sweep_once(&engine, receipt.hold_expires_at + 1).await, 0);
        let days = engine.inventory(room_type.id, d(3), d(5)).unwrap();
        assert!(days.iter().all(|day| day.reserved == 1 && day.holds == 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sweepers_release_once() {
        let (engine, hotel, room_type) = engine_with_room("sweep_concurrent.wal").await;
        let now = 1_000_000;
        let receipt = engine
            .create_reservation(request("a", &hotel, &room_type, PaymentStrategy::OnlineIntent), now)
            .await
            .unwrap();

        let at = receipt.hold_expires_at;
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { sweep_once(&engine, at).await })
            })
            .collect();
        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 1);
        let days = engine.inventory(room_type.id, d(3), d(5)).unwrap();
        assert!(days.iter().all(|day| day.holds == 0));
    }

    #[tokio::test]
    async fn compactor_runs_past_threshold() {
        let (engine, _, _) = engine_with_room("compactor.wal").await;
        assert!(engine.wal_appends_since_compact().await > 10);

        let task = tokio::spawn(run_compactor(engine.clone(), 10, Duration::from_millis(10)));
        for _ in 0..100 {
            if engine.wal_appends_since_compact().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
