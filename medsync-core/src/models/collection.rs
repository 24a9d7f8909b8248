use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity kinds mirrored by the local store. Each maps to one REST resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Collection {
    Hospitals,
    Doctors,
    Patients,
    MedicalRecords,
    Bills,
    Pharmacies,
    Workers,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Hospitals,
        Collection::Doctors,
        Collection::Patients,
        Collection::MedicalRecords,
        Collection::Bills,
        Collection::Pharmacies,
        Collection::Workers,
    ];

    /// REST path segment and storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Hospitals => "hospitals",
            Collection::Doctors => "doctors",
            Collection::Patients => "patients",
            Collection::MedicalRecords => "medical-records",
            Collection::Bills => "bills",
            Collection::Pharmacies => "pharmacies",
            Collection::Workers => "workers",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hospitals" => Ok(Collection::Hospitals),
            "doctors" => Ok(Collection::Doctors),
            "patients" => Ok(Collection::Patients),
            "medical-records" | "medical_records" | "medicalrecords" => {
                Ok(Collection::MedicalRecords)
            }
            "bills" => Ok(Collection::Bills),
            "pharmacies" => Ok(Collection::Pharmacies),
            "workers" => Ok(Collection::Workers),
            _ => Err(format!(
                "Invalid collection '{}'. Valid options: hospitals, doctors, patients, \
                 medical-records, bills, pharmacies, workers",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_display() {
        assert_eq!(format!("{}", Collection::Patients), "patients");
        assert_eq!(format!("{}", Collection::MedicalRecords), "medical-records");
    }

    #[test]
    fn test_collection_from_str() {
        assert_eq!(Collection::from_str("BILLS").unwrap(), Collection::Bills);
        assert_eq!(
            Collection::from_str("medical_records").unwrap(),
            Collection::MedicalRecords
        );
        assert_eq!(
            Collection::from_str("MedicalRecords").unwrap(),
            Collection::MedicalRecords
        );
    }

    #[test]
    fn test_collection_from_str_invalid() {
        assert!(Collection::from_str("nurses").is_err());
        assert!(Collection::from_str("").is_err());
    }

    #[test]
    fn test_every_collection_parses_its_own_name() {
        for c in Collection::ALL {
            assert_eq!(Collection::from_str(c.as_str()).unwrap(), c);
        }
    }

    #[test]
    fn test_collection_json() {
        let json = serde_json::to_string(&Collection::MedicalRecords).unwrap();
        assert_eq!(json, "\"medical-records\"");
    }
}
