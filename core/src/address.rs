//! Shipping-address completeness scoring.
//!
//! Scoring is a locale strategy: the default profile is tuned for
//! Bangladeshi addressing, and other markets plug in their own
//! allow-list and weights through `AddressQualityEvaluator`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShippingAddress {
    pub address_1: String,
    pub address_2: String,
    pub city:      String,
    pub postcode:  String,
}

impl ShippingAddress {
    pub fn new(
        address_1: impl Into<String>,
        address_2: impl Into<String>,
        city:      impl Into<String>,
        postcode:  impl Into<String>,
    ) -> Self {
        Self {
            address_1: address_1.into(),
            address_2: address_2.into(),
            city:      city.into(),
            postcode:  postcode.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressQuality {
    /// 0–100.
    pub completeness: u8,
    pub is_complete:  bool,
}

pub trait AddressQualityEvaluator: Send + Sync {
    fn evaluate(&self, address: &ShippingAddress) -> AddressQuality;
}

/// Points and thresholds for one locale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocaleProfile {
    pub name:                String,
    pub line1_points:        u8,
    /// Line 1 must be strictly longer than this many characters.
    pub line1_min_len:       usize,
    pub line2_points:        u8,
    pub city_points:         u8,
    /// City must be strictly longer than this many characters.
    pub city_min_len:        usize,
    pub known_city_bonus:    u8,
    pub postcode_points:     u8,
    /// Postcode needs at least this many characters.
    pub postcode_min_len:    usize,
    pub complete_at:         u8,
    pub known_localities:    Vec<String>,
}

impl LocaleProfile {
    pub fn bangladesh() -> Self {
        let localities = [
            "Dhaka", "Gulshan", "Dhanmondi", "Uttara", "Banani", "Mohakhali",
            "Mirpur", "Wari", "Old Dhaka", "Motijheel", "Farmgate", "Tejgaon",
            "Chittagong", "Sylhet", "Rajshahi", "Khulna", "Barisal", "Rangpur",
        ];
        Self {
            name:             "bd".into(),
            line1_points:     30,
            line1_min_len:    10,
            line2_points:     20,
            city_points:      30,
            city_min_len:     2,
            known_city_bonus: 10,
            postcode_points:  10,
            postcode_min_len: 4,
            complete_at:      60,
            known_localities: localities.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn is_known_locality(&self, city: &str) -> bool {
        let city = city.to_lowercase();
        self.known_localities.iter().any(|l| l.to_lowercase() == city)
    }
}

impl Default for LocaleProfile {
    fn default() -> Self {
        Self::bangladesh()
    }
}

impl AddressQualityEvaluator for LocaleProfile {
    fn evaluate(&self, address: &ShippingAddress) -> AddressQuality {
        let mut score: u32 = 0;

        if address.address_1.chars().count() > self.line1_min_len {
            score += self.line1_points as u32;
        }
        if !address.address_2.is_empty() {
            score += self.line2_points as u32;
        }
        if address.city.chars().count() > self.city_min_len {
            score += self.city_points as u32;
            if self.is_known_locality(&address.city) {
                score += self.known_city_bonus as u32;
            }
        }
        if address.postcode.chars().count() >= self.postcode_min_len {
            score += self.postcode_points as u32;
        }

        let completeness = score.min(100) as u8;
        AddressQuality {
            completeness,
            is_complete: completeness >= self.complete_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn city_bonus_is_case_insensitive() {
        let profile = LocaleProfile::bangladesh();
        let q = profile.evaluate(&ShippingAddress::new("", "", "old dhaka", ""));
        assert_eq!(q.completeness, 40);
        assert!(!q.is_complete);
    }

    #[test]
    fn short_fields_earn_nothing() {
        let profile = LocaleProfile::bangladesh();
        let q = profile.evaluate(&ShippingAddress::new("House 12", "", "Ab", "121"));
        assert_eq!(q.completeness, 0);
    }

    #[test]
    fn full_address_caps_at_100() {
        let profile = LocaleProfile::bangladesh();
        let q = profile.evaluate(&ShippingAddress::new(
            "House 12, Road 7, Block C", "Flat 4B", "Banani", "1213",
        ));
        assert_eq!(q.completeness, 100);
        assert!(q.is_complete);
    }
}
