//! Booking domain model.
//!
//! A [`BookingRequest`] is what a client submits. A [`BookingConfirmation`] is
//! what the processing loop publishes back: the original request plus a
//! reference number, a price and a seat.
//!
//! Both travel as camelCase JSON. The confirmation embeds its request and
//! flattens it on the wire, so a confirmation payload is a superset of a
//! request payload:
//!
//! ```json
//! {
//!   "movieName": "Dune",
//!   "cinema": 3,
//!   "screeningTime": "2024-01-01T20:00:00Z",
//!   "referenceId": "5f0c6b9e-3a53-4f0e-9a4c-8a3b1c2d4e5f",
//!   "price": 23.0,
//!   "seatNumber": 42
//! }
//! ```

use chrono::{DateTime, FixedOffset};
use rand::rngs::OsRng;
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use uuid::Uuid;

/// Whole-number prices a confirmation can carry (upper bound exclusive).
pub const PRICE_RANGE: Range<u32> = 10..50;

/// Seat numbers a confirmation can carry (upper bound exclusive).
pub const SEAT_RANGE: Range<u32> = 1..100;

/// A request to book a screening.
///
/// Immutable once constructed; read it through the accessors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    movie_name: String,
    cinema: i32,
    #[serde(with = "rfc3339")]
    screening_time: DateTime<FixedOffset>,
}

impl BookingRequest {
    /// Create a booking request.
    #[must_use]
    pub fn new(
        movie_name: impl Into<String>,
        cinema: i32,
        screening_time: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            movie_name: movie_name.into(),
            cinema,
            screening_time,
        }
    }

    /// Title of the movie being booked.
    #[must_use]
    pub fn movie_name(&self) -> &str {
        &self.movie_name
    }

    /// Cinema (screen) identifier.
    #[must_use]
    pub const fn cinema(&self) -> i32 {
        self.cinema
    }

    /// Screening start, with the offset the client supplied.
    #[must_use]
    pub const fn screening_time(&self) -> DateTime<FixedOffset> {
        self.screening_time
    }
}

impl fmt::Display for BookingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Movie booking: \"{}\" in Cinema {} at {}]",
            self.movie_name, self.cinema, self.screening_time
        )
    }
}

/// A confirmed booking.
///
/// Holds the request it was generated from plus the values assigned during
/// processing. Created once per processed request and never modified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingConfirmation {
    #[serde(flatten)]
    request: BookingRequest,
    reference_id: Uuid,
    price: f64,
    seat_number: u32,
}

impl BookingConfirmation {
    /// Confirm a request, drawing reference id, price and seat from the
    /// operating system's random source.
    #[must_use]
    pub fn from_request(request: BookingRequest) -> Self {
        Self::from_request_with_rng(request, &mut OsRng)
    }

    /// Confirm a request using the given cryptographically secure generator.
    ///
    /// The price is a whole number in [`PRICE_RANGE`] and the seat is in
    /// [`SEAT_RANGE`]; the reference id is a version 4 UUID built from the
    /// same generator.
    #[must_use]
    pub fn from_request_with_rng<R>(request: BookingRequest, rng: &mut R) -> Self
    where
        R: RngCore + CryptoRng,
    {
        let mut id_bytes = [0u8; 16];
        rng.fill_bytes(&mut id_bytes);

        Self {
            request,
            reference_id: uuid::Builder::from_random_bytes(id_bytes).into_uuid(),
            price: f64::from(rng.gen_range(PRICE_RANGE)),
            seat_number: rng.gen_range(SEAT_RANGE),
        }
    }

    /// The request this confirmation answers.
    #[must_use]
    pub const fn request(&self) -> &BookingRequest {
        &self.request
    }

    /// Globally unique booking reference.
    #[must_use]
    pub const fn reference_id(&self) -> Uuid {
        self.reference_id
    }

    /// Final price.
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.price
    }

    /// Assigned seat.
    #[must_use]
    pub const fn seat_number(&self) -> u32 {
        self.seat_number
    }
}

impl fmt::Display for BookingConfirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Movie booking confirmation: Reference number is {} for {}. Final price is {}. Your seat is {} in Cinema {}]",
            self.reference_id,
            self.request.movie_name,
            self.price,
            self.seat_number,
            self.request.cinema
        )
    }
}

/// RFC 3339 timestamps that keep their offset, writing a zero offset as `Z`.
mod rfc3339 {
    use chrono::{DateTime, FixedOffset, SecondsFormat};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(value: &DateTime<FixedOffset>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn dune() -> BookingRequest {
        BookingRequest::new(
            "Dune",
            3,
            DateTime::parse_from_rfc3339("2024-01-01T20:00:00Z").unwrap(),
        )
    }

    #[test]
    fn request_uses_camel_case_wire_names() {
        let json = serde_json::to_value(dune()).unwrap();
        assert_eq!(json["movieName"], "Dune");
        assert_eq!(json["cinema"], 3);
        assert_eq!(json["screeningTime"], "2024-01-01T20:00:00Z");
    }

    #[test]
    fn request_keeps_non_zero_offset() {
        let json = r#"{"movieName":"Heat","cinema":1,"screeningTime":"2024-06-01T19:30:00+02:00"}"#;
        let request: BookingRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.screening_time().offset().local_minus_utc(), 7200);

        let back = serde_json::to_value(&request).unwrap();
        assert_eq!(back["screeningTime"], "2024-06-01T19:30:00+02:00");
    }

    #[test]
    fn request_ignores_unknown_fields() {
        let json = r#"{"movieName":"Dune","cinema":3,"screeningTime":"2024-01-01T20:00:00Z","popcorn":true}"#;
        let request: BookingRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request, dune());
    }

    #[test]
    fn request_rejects_missing_fields() {
        let json = r#"{"movieName":"Dune","cinema":3}"#;
        assert!(serde_json::from_str::<BookingRequest>(json).is_err());
    }

    #[test]
    fn confirmation_copies_request_fields() {
        let request = dune();
        let confirmation = BookingConfirmation::from_request(request.clone());

        assert_eq!(confirmation.request().movie_name(), "Dune");
        assert_eq!(confirmation.request().cinema(), 3);
        assert_eq!(confirmation.request(), &request);
        assert_eq!(
            *confirmation.request().screening_time().offset(),
            *request.screening_time().offset()
        );
        assert_eq!(confirmation.reference_id().get_version_num(), 4);
    }

    #[test]
    fn confirmation_flattens_request_on_the_wire() {
        let confirmation = BookingConfirmation::from_request(dune());
        let json = serde_json::to_value(&confirmation).unwrap();

        assert_eq!(json["movieName"], "Dune");
        assert_eq!(json["cinema"], 3);
        assert_eq!(json["screeningTime"], "2024-01-01T20:00:00Z");
        assert_eq!(
            json["referenceId"],
            confirmation.reference_id().to_string()
        );
        assert_eq!(json["seatNumber"], confirmation.seat_number());
        assert!(json.get("request").is_none());

        let decoded: BookingConfirmation = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, confirmation);
    }

    #[test]
    fn confirmation_display_mentions_reference_and_seat() {
        let confirmation = BookingConfirmation::from_request(dune());
        let text = confirmation.to_string();
        assert!(text.contains(&confirmation.reference_id().to_string()));
        assert!(text.contains("for Dune"));
        assert!(text.ends_with("in Cinema 3]"));
    }

    #[test]
    fn reference_ids_do_not_collide() {
        let ids: HashSet<Uuid> = (0..10_000)
            .map(|_| BookingConfirmation::from_request(dune()).reference_id())
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    proptest! {
        #[test]
        fn generated_values_stay_in_bounds(
            movie in ".{0,40}",
            cinema in any::<i32>(),
            secs in 0i64..4_102_444_800,
            offset_hours in -12i32..=14,
        ) {
            let offset = FixedOffset::east_opt(offset_hours * 3600).unwrap();
            let time = DateTime::from_timestamp(secs, 0).unwrap().with_timezone(&offset);
            let request = BookingRequest::new(movie.clone(), cinema, time);

            let confirmation = BookingConfirmation::from_request(request);

            prop_assert!(confirmation.price() >= 10.0 && confirmation.price() < 50.0);
            prop_assert_eq!(confirmation.price().fract(), 0.0);
            prop_assert!((1..100).contains(&confirmation.seat_number()));
            prop_assert_eq!(confirmation.request().movie_name(), movie.as_str());
            prop_assert_eq!(confirmation.request().cinema(), cinema);
            prop_assert_eq!(confirmation.request().screening_time(), time);
            prop_assert_eq!(*confirmation.request().screening_time().offset(), *time.offset());
        }

        #[test]
        fn request_survives_json(
            movie in ".{0,40}",
            cinema in any::<i32>(),
            secs in 0i64..4_102_444_800,
            offset_minutes in -720i32..=840,
        ) {
            let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap();
            let time = DateTime::from_timestamp(secs, 0).unwrap().with_timezone(&offset);
            let request = BookingRequest::new(movie, cinema, time);

            let json = serde_json::to_string(&request).unwrap();
            let decoded: BookingRequest = serde_json::from_str(&json).unwrap();

            prop_assert_eq!(&decoded, &request);
            prop_assert_eq!(*decoded.screening_time().offset(), *request.screening_time().offset());
        }
    }
}
