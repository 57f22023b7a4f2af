//! On-disk snapshot of a finished comparison, used by `level`.

use anyhow::{anyhow, bail, Context, Result};
use bid_comparison::{BaselineSet, ComparisonResult, ContractorBid};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub project_id: Uuid,
    pub trade_type: String,
    pub result: ComparisonResult,
    pub bids: Vec<ContractorBid>,
    #[serde(default)]
    pub baselines: BaselineSet,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))
    }

    /// Resolve a contractor by id or case-insensitive name.
    pub fn contractor_id(&self, reference: &str) -> Result<Uuid> {
        if let Ok(id) = Uuid::parse_str(reference) {
            if self.bids.iter().any(|b| b.contractor_id == id) {
                return Ok(id);
            }
        }
        self.bids
            .iter()
            .find(|b| b.contractor_name.eq_ignore_ascii_case(reference.trim()))
            .map(|b| b.contractor_id)
            .ok_or_else(|| anyhow!("Unknown contractor '{}'", reference))
    }
}

/// A parsed `--set key=contractor:quantity[:unit]` argument.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineEdit {
    pub item_key: String,
    pub contractor: String,
    pub quantity: f64,
    pub unit: Option<String>,
}

impl std::str::FromStr for BaselineEdit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (item_key, rest) = s
            .rsplit_once('=')
            .ok_or_else(|| anyhow!("expected key=contractor:quantity[:unit], got '{}'", s))?;

        let mut parts = rest.split(':');
        let contractor = parts.next().unwrap_or_default().trim();
        let quantity = parts
            .next()
            .ok_or_else(|| anyhow!("missing quantity in '{}'", s))?
            .trim();
        let unit = parts.next().map(|u| u.trim().to_string()).filter(|u| !u.is_empty());

        if item_key.trim().is_empty() || contractor.is_empty() {
            bail!("expected key=contractor:quantity[:unit], got '{}'", s);
        }

        Ok(Self {
            item_key: item_key.trim().to_string(),
            contractor: contractor.to_string(),
            quantity: quantity
                .parse()
                .with_context(|| format!("invalid quantity '{}'", quantity))?,
            unit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bid_comparison::ComparisonStatus;

    #[test]
    fn test_parse_edit() {
        let edit: BaselineEdit = "Hang board=Acme:12000:SF".parse().unwrap();
        assert_eq!(edit.item_key, "Hang board");
        assert_eq!(edit.contractor, "Acme");
        assert_eq!(edit.quantity, 12000.0);
        assert_eq!(edit.unit.as_deref(), Some("SF"));

        let no_unit: BaselineEdit = "Tape=Acme:10".parse().unwrap();
        assert_eq!(no_unit.unit, None);

        assert!("Tape".parse::<BaselineEdit>().is_err());
        assert!("Tape=Acme".parse::<BaselineEdit>().is_err());
        assert!("Tape=Acme:lots".parse::<BaselineEdit>().is_err());
    }

    #[test]
    fn test_contractor_lookup() {
        let project_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        let snapshot = Snapshot {
            project_id,
            trade_type: "drywall".into(),
            result: ComparisonResult::new(project_id, ComparisonStatus::Complete),
            bids: vec![ContractorBid {
                contractor_id: id,
                contractor_name: "Acme Interiors".into(),
                items: vec![],
            }],
            baselines: BaselineSet::new(),
        };

        assert_eq!(snapshot.contractor_id("acme interiors").unwrap(), id);
        assert_eq!(snapshot.contractor_id(&id.to_string()).unwrap(), id);
        assert!(snapshot.contractor_id("Crown").is_err());
    }
}
