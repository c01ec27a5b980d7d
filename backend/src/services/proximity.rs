//! Great-circle distance and distance ranking. Pure functions, no state.

use std::cmp::Ordering;

use crate::constants::EARTH_RADIUS_KM;
use crate::models::Location;

/// Haversine distance in kilometres.
///
/// The two inputs are ordered canonically before computing so the result is
/// bit-for-bit symmetric, not merely symmetric within rounding.
pub fn distance(a: &Location, b: &Location) -> f64 {
    let (p, q) = if (a.latitude, a.longitude) <= (b.latitude, b.longitude) {
        (a, b)
    } else {
        (b, a)
    };

    let lat1 = p.latitude.to_radians();
    let lat2 = q.latitude.to_radians();
    let d_lat = (q.latitude - p.latitude).to_radians();
    let d_lon = (q.longitude - p.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

pub fn is_within_range(a: &Location, b: &Location, max_km: f64) -> bool {
    distance(a, b) <= max_km
}

/// Anything that may carry a location and can be ranked by it.
pub trait Located {
    fn location(&self) -> Option<&Location>;
}

impl Located for Location {
    fn location(&self) -> Option<&Location> {
        Some(self)
    }
}

impl Located for crate::models::Profile {
    fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }
}

/// A candidate paired with its distance from the ranking origin, if known.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<T> {
    pub item: T,
    pub distance_km: Option<f64>,
}

/// Sorts candidates ascending by distance from `origin`.
///
/// Candidates without a location come after every located one, keeping
/// their input order. Without an origin the input order is returned as is.
/// The sort is stable, so equal distances also keep input order.
pub fn rank<T: Located>(origin: Option<&Location>, candidates: Vec<T>) -> Vec<Ranked<T>> {
    let mut ranked: Vec<Ranked<T>> = candidates
        .into_iter()
        .map(|item| {
            let distance_km = match (origin, item.location()) {
                (Some(origin), Some(location)) => Some(distance(origin, location)),
                _ => None,
            };
            Ranked { item, distance_km }
        })
        .collect();

    if origin.is_some() {
        ranked.sort_by(|a, b| compare_distance(a.distance_km, b.distance_km));
    }

    ranked
}

fn compare_distance(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DISTANCE_EPSILON_KM;

    #[derive(Debug, Clone, PartialEq)]
    struct Candidate {
        id: &'static str,
        location: Option<Location>,
    }

    impl Located for Candidate {
        fn location(&self) -> Option<&Location> {
            self.location.as_ref()
        }
    }

    fn loc(latitude: f64, longitude: f64) -> Location {
        Location { latitude, longitude }
    }

    fn ids(ranked: &[Ranked<Candidate>]) -> Vec<&'static str> {
        ranked.iter().map(|r| r.item.id).collect()
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let mumbai = loc(19.07, 72.87);
        assert!(distance(&mumbai, &mumbai).abs() < DISTANCE_EPSILON_KM);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let points = [
            loc(19.07, 72.87),
            loc(19.08, 72.88),
            loc(-33.86, 151.21),
            loc(51.5, -0.12),
            loc(90.0, 0.0),
            loc(-90.0, 180.0),
        ];
        for a in &points {
            for b in &points {
                assert_eq!(distance(a, b), distance(b, a));
            }
        }
    }

    #[test]
    fn test_known_distances() {
        // Neighbouring points in Mumbai, roughly 1.5 km apart.
        let d = distance(&loc(19.07, 72.87), &loc(19.08, 72.88));
        assert!((d - 1.5).abs() < 0.1, "got {}", d);

        // London to Paris is about 344 km.
        let d = distance(&loc(51.5074, -0.1278), &loc(48.8566, 2.3522));
        assert!((d - 343.5).abs() < 2.0, "got {}", d);

        // Antipodes are half the circumference apart.
        let d = distance(&loc(0.0, 0.0), &loc(0.0, 180.0));
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-3);
    }

    #[test]
    fn test_is_within_range_is_inclusive() {
        let a = loc(19.07, 72.87);
        let b = loc(19.08, 72.88);
        let d = distance(&a, &b);
        assert!(is_within_range(&a, &b, d));
        assert!(!is_within_range(&a, &b, d - 0.01));
    }

    #[test]
    fn test_rank_orders_by_distance_then_unlocated() {
        let origin = loc(19.07, 72.87);
        let candidates = vec![
            Candidate { id: "none-1", location: None },
            Candidate { id: "far", location: Some(loc(18.52, 73.85)) },
            Candidate { id: "near", location: Some(loc(19.08, 72.88)) },
            Candidate { id: "none-2", location: None },
        ];

        let ranked = rank(Some(&origin), candidates);
        assert_eq!(ids(&ranked), vec!["near", "far", "none-1", "none-2"]);
        assert!(ranked[0].distance_km.unwrap() < ranked[1].distance_km.unwrap());
        assert_eq!(ranked[2].distance_km, None);
    }

    #[test]
    fn test_rank_without_origin_keeps_input_order() {
        let candidates = vec![
            Candidate { id: "b", location: Some(loc(10.0, 10.0)) },
            Candidate { id: "a", location: None },
            Candidate { id: "c", location: Some(loc(0.0, 0.0)) },
        ];
        let ranked = rank(None, candidates);
        assert_eq!(ids(&ranked), vec!["b", "a", "c"]);
        assert!(ranked.iter().all(|r| r.distance_km.is_none()));
    }

    #[test]
    fn test_rank_is_stable_for_equal_distances() {
        let origin = loc(0.0, 0.0);
        let same = Some(loc(1.0, 1.0));
        let candidates = vec![
            Candidate { id: "first", location: same },
            Candidate { id: "second", location: same },
            Candidate { id: "third", location: same },
        ];
        let ranked = rank(Some(&origin), candidates);
        assert_eq!(ids(&ranked), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_every_located_candidate_precedes_unlocated() {
        let origin = loc(12.97, 77.59);
        let candidates: Vec<Candidate> = (0..20)
            .map(|i| Candidate {
                id: "x",
                location: if i % 3 == 0 {
                    None
                } else {
                    Some(loc(12.0 + i as f64 * 0.37, 77.0 - i as f64 * 0.21))
                },
            })
            .collect();

        let ranked = rank(Some(&origin), candidates);
        let first_unlocated = ranked
            .iter()
            .position(|r| r.distance_km.is_none())
            .unwrap_or(ranked.len());
        assert!(ranked[first_unlocated..].iter().all(|r| r.distance_km.is_none()));
        assert!(ranked[..first_unlocated]
            .windows(2)
            .all(|w| w[0].distance_km <= w[1].distance_km));
    }
}
