//! Verdict — canonical classification vocabulary
//!
//! Classifiers emit whatever label their model was trained with (ints,
//! negative sentinels, free text). [`Verdict::sanitize`] is the one table
//! that folds all of them onto the canonical set. Every call site that
//! handles a raw label goes through it.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Canonical classification outcome
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verdict {
    Benign,
    Suspicious,
    Malicious,
    Unknown,
    Phishing,
    /// Generic malware family label (`MALWARE`)
    MalwareFamily,
    SqlInjection,
    SynAttack,
    /// Label not in the table, upper-cased and trimmed
    Raw(String),
}

impl Verdict {
    /// Map a raw model label onto the canonical vocabulary.
    ///
    /// | raw (case-insensitive, trimmed)                 | verdict        |
    /// |-------------------------------------------------|----------------|
    /// | `benign` `normal` `0` `safe` `clean`            | Benign         |
    /// | `suspicious` `-1` `-1.0` `anomaly` `anomalous`  | Suspicious     |
    /// | `malicious` `attack` `threat`                   | Malicious      |
    /// | `unknown` `n/a` `none` `invalid input` (empty)  | Unknown        |
    /// | `phishing` `4`                                  | Phishing       |
    /// | `malware` `1`                                   | MalwareFamily  |
    /// | `sql` `sql_injection` `sqli` `2`                | SqlInjection   |
    /// | `syn` `syn_attack` `syn_flood` `3`              | SynAttack      |
    /// | anything else                                   | Raw(UPPERCASE) |
    ///
    /// Total and idempotent: every canonical label maps back to its own variant.
    pub fn sanitize(raw: &str) -> Verdict {
        let upper = raw.trim().to_uppercase();
        match upper.to_lowercase().as_str() {
            "benign" | "normal" | "0" | "safe" | "clean" => Verdict::Benign,
            "suspicious" | "-1" | "-1.0" | "anomaly" | "anomalous" => Verdict::Suspicious,
            "malicious" | "attack" | "threat" => Verdict::Malicious,
            "unknown" | "n/a" | "none" | "" | "invalid input" => Verdict::Unknown,
            "phishing" | "4" => Verdict::Phishing,
            "malware" | "1" => Verdict::MalwareFamily,
            "sql" | "sql_injection" | "sqli" | "2" => Verdict::SqlInjection,
            "syn" | "syn_attack" | "syn_flood" | "3" => Verdict::SynAttack,
            _ => Verdict::Raw(upper),
        }
    }

    /// Canonical label as persisted in the threat log
    pub fn label(&self) -> &str {
        match self {
            Verdict::Benign => "BENIGN",
            Verdict::Suspicious => "SUSPICIOUS",
            Verdict::Malicious => "MALICIOUS",
            Verdict::Unknown => "UNKNOWN",
            Verdict::Phishing => "PHISHING",
            Verdict::MalwareFamily => "MALWARE",
            Verdict::SqlInjection => "SQL_INJECTION",
            Verdict::SynAttack => "SYN_ATTACK",
            Verdict::Raw(label) => label,
        }
    }

    /// Re-run the table over this verdict's own label
    pub fn canonical(&self) -> Verdict {
        Verdict::sanitize(self.label())
    }

    /// Anything other than benign or unknown is worth an alert
    pub fn is_threat(&self) -> bool {
        !matches!(self, Verdict::Benign | Verdict::Unknown)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<&str> for Verdict {
    fn from(raw: &str) -> Self {
        Verdict::sanitize(raw)
    }
}

impl Serialize for Verdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(VerdictVisitor)
    }
}

/// Historical records carry ints, floats and bools as well as strings
struct VerdictVisitor;

impl<'de> Visitor<'de> for VerdictVisitor {
    type Value = Verdict;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a verdict label or numeric model class")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Verdict, E> {
        Ok(Verdict::sanitize(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Verdict, E> {
        Ok(Verdict::sanitize(&v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Verdict, E> {
        Ok(Verdict::sanitize(&v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Verdict, E> {
        if v.is_finite() && v.fract() == 0.0 {
            Ok(Verdict::sanitize(&format!("{}", v as i64)))
        } else {
            Ok(Verdict::sanitize(&v.to_string()))
        }
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Verdict, E> {
        Ok(Verdict::sanitize(if v { "1" } else { "0" }))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Verdict, E> {
        Ok(Verdict::Unknown)
    }

    fn visit_none<E: de::Error>(self) -> Result<Verdict, E> {
        Ok(Verdict::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::{Alphanumeric, DistString};
    use rand::Rng;

    #[test]
    fn test_known_labels() {
        assert_eq!(Verdict::sanitize("benign"), Verdict::Benign);
        assert_eq!(Verdict::sanitize(" Normal "), Verdict::Benign);
        assert_eq!(Verdict::sanitize("-1"), Verdict::Suspicious);
        assert_eq!(Verdict::sanitize("Malicious"), Verdict::Malicious);
        assert_eq!(Verdict::sanitize("sql"), Verdict::SqlInjection);
        assert_eq!(Verdict::sanitize("3"), Verdict::SynAttack);
        assert_eq!(Verdict::sanitize(""), Verdict::Unknown);
    }

    #[test]
    fn test_unknown_label_uppercased() {
        assert_eq!(
            Verdict::sanitize("ransomware-x"),
            Verdict::Raw("RANSOMWARE-X".into())
        );
    }

    #[test]
    fn test_canonical_labels_round_trip() {
        for v in [
            Verdict::Benign,
            Verdict::Suspicious,
            Verdict::Malicious,
            Verdict::Unknown,
            Verdict::Phishing,
            Verdict::MalwareFamily,
            Verdict::SqlInjection,
            Verdict::SynAttack,
        ] {
            assert_eq!(Verdict::sanitize(v.label()), v);
        }
    }

    #[test]
    fn test_sanitize_idempotent_random_labels() {
        let mut rng = rand::thread_rng();
        let seeds = ["benign", "SQL", "-1", "4", "phishing", "weird"];
        for i in 0..200 {
            let raw = if i % 4 == 0 {
                seeds[rng.gen_range(0..seeds.len())].to_string()
            } else {
                let len = rng.gen_range(0..16);
                let mut s = Alphanumeric.sample_string(&mut rng, len);
                if rng.gen_bool(0.3) {
                    s.push_str("  -_/ ");
                }
                s
            };
            let once = Verdict::sanitize(&raw);
            let twice = Verdict::sanitize(once.label());
            assert_eq!(once, twice, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn test_serde_accepts_numeric_history() {
        let v: Verdict = serde_json::from_str("-1").unwrap();
        assert_eq!(v, Verdict::Suspicious);
        let v: Verdict = serde_json::from_str("2").unwrap();
        assert_eq!(v, Verdict::SqlInjection);
        let v: Verdict = serde_json::from_str("\"Benign\"").unwrap();
        assert_eq!(v, Verdict::Benign);
        assert_eq!(serde_json::to_string(&Verdict::SynAttack).unwrap(), "\"SYN_ATTACK\"");
    }

    #[test]
    fn test_is_threat() {
        assert!(!Verdict::Benign.is_threat());
        assert!(!Verdict::Unknown.is_threat());
        assert!(Verdict::Malicious.is_threat());
        assert!(Verdict::Raw("X".into()).is_threat());
    }
}
