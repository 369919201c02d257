//! Zones: polygon + object-type/confidence gates used to suppress
//! uninteresting detections.

use crate::config::ZoneConfig;

/// Runtime representation of a zone, shared between config-sourced and
/// store-sourced origins. The union of both origins is evaluated
/// identically; same-`id` zones across origins are not deduplicated
/// against each other.
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: String,
    pub camera_id: String,
    pub name: String,
    pub enabled: bool,
    pub polygon: Vec<(f64, f64)>,
    pub allowed_types: Vec<String>,
    pub min_confidence: f64,
    pub min_size: Option<f64>,
    pub sensitivity: u8,
    pub cooldown_secs: u64,
}

impl From<&ZoneConfig> for Zone {
    fn from(c: &ZoneConfig) -> Self {
        Zone {
            id: c.id.clone(),
            camera_id: c.camera_id.clone(),
            name: c.name.clone(),
            enabled: c.enabled,
            polygon: c.polygon.clone(),
            allowed_types: c.allowed_types.clone(),
            min_confidence: c.min_confidence,
            min_size: c.min_size,
            sensitivity: c.sensitivity,
            cooldown_secs: c.cooldown_secs,
        }
    }
}

/// A minimal view of a detection sufficient for gate evaluation, so
/// `zone` does not need to depend on the full `detection`/`inference`
/// response types.
pub struct DetectionView<'a> {
    pub object_type: &'a str,
    pub label: &'a str,
    pub confidence: f64,
    /// bbox center, normalized [0,1]^2.
    pub center: (f64, f64),
}

/// Classic crossing-number point-in-polygon test. A point exactly on an
/// edge is not special-cased, so callers must not assert on edge
/// membership.
pub fn point_in_polygon(point: (f64, f64), polygon: &[(f64, f64)]) -> bool {
    let (x, y) = point;
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        let crosses = (yi > y) != (yj > y);
        if crosses {
            let x_intersect = xj + (y - yj) / (yi - yj) * (xi - xj);
            if x < x_intersect {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Evaluate whether a zone admits a detection: type gate, confidence
/// gate, then the polygon containment test.
pub fn zone_admits(zone: &Zone, det: &DetectionView) -> bool {
    if !zone.enabled {
        return false;
    }
    let type_ok = zone.allowed_types.is_empty()
        || zone.allowed_types.iter().any(|t| t == det.object_type || t == det.label);
    if !type_ok {
        return false;
    }
    if zone.min_confidence > 0.0 && det.confidence < zone.min_confidence {
        return false;
    }
    point_in_polygon(det.center, &zone.polygon)
}

/// Evaluate a detection against the effective (unioned) zone set for a
/// camera. Returns the first admitting zone, if any. An empty zone set
/// passes every detection unconditionally — see `Admission` for how that
/// is distinguished from "zones exist, none admit".
pub enum Admission<'a> {
    /// The zone union was empty; the detection passes unconditionally.
    NoZonesConfigured,
    /// A specific zone admitted the detection.
    Admitted(&'a Zone),
    /// Zones exist but none admitted this detection.
    Rejected,
}

pub fn evaluate(zones: &[Zone], det: &DetectionView) -> Admission<'_> {
    if zones.is_empty() {
        return Admission::NoZonesConfigured;
    }
    for zone in zones {
        if zone_admits(zone, det) {
            return Admission::Admitted(zone);
        }
    }
    Admission::Rejected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_zone(allowed: &[&str], min_confidence: f64) -> Zone {
        Zone {
            id: "z1".into(),
            camera_id: "cam1".into(),
            name: "front".into(),
            enabled: true,
            polygon: vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)],
            allowed_types: allowed.iter().map(|s| s.to_string()).collect(),
            min_confidence,
            min_size: None,
            sensitivity: 5,
            cooldown_secs: 0,
        }
    }

    #[test]
    fn person_inside_zone_with_sufficient_confidence_is_admitted() {
        let zone = square_zone(&["person"], 0.5);
        let det = DetectionView { object_type: "person", label: "person", confidence: 0.6, center: (0.5, 0.5) };
        assert!(zone_admits(&zone, &det));
    }

    #[test]
    fn disallowed_type_is_rejected() {
        let zone = square_zone(&["person"], 0.5);
        let det = DetectionView { object_type: "vehicle", label: "vehicle", confidence: 0.9, center: (0.5, 0.5) };
        assert!(!zone_admits(&zone, &det));
    }

    #[test]
    fn insufficient_confidence_is_rejected() {
        let zone = square_zone(&["person"], 0.5);
        let det = DetectionView { object_type: "person", label: "person", confidence: 0.4, center: (0.5, 0.5) };
        assert!(!zone_admits(&zone, &det));
    }

    #[test]
    fn center_outside_polygon_is_rejected() {
        let zone = square_zone(&["person"], 0.5);
        let det = DetectionView { object_type: "person", label: "person", confidence: 0.9, center: (1.2, 1.2) };
        assert!(!zone_admits(&zone, &det));
    }

    #[test]
    fn empty_allowed_types_admits_any_type() {
        let zone = square_zone(&[], 0.0);
        let det = DetectionView { object_type: "anything", label: "anything", confidence: 0.1, center: (0.5, 0.5) };
        assert!(zone_admits(&zone, &det));
    }

    #[test]
    fn empty_zone_union_passes_detection() {
        let det = DetectionView { object_type: "person", label: "person", confidence: 0.9, center: (0.5, 0.5) };
        match evaluate(&[], &det) {
            Admission::NoZonesConfigured => {}
            _ => panic!("expected NoZonesConfigured"),
        }
    }

    #[test]
    fn first_admitting_zone_wins_tie_break() {
        let mut z1 = square_zone(&["vehicle"], 0.0); // does not admit person
        z1.id = "no-match".into();
        let mut z2 = square_zone(&["person"], 0.0);
        z2.id = "match".into();
        let det = DetectionView { object_type: "person", label: "person", confidence: 0.9, center: (0.5, 0.5) };
        match evaluate(&[z1, z2], &det) {
            Admission::Admitted(z) => assert_eq!(z.id, "match"),
            _ => panic!("expected admission"),
        }
    }
}
