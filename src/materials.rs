// 🧱 Materials - Bill of materials import/export and shortfall
//
// Formats:
//   whitespace  "Isogen 2400"      (last token is the quantity)
//   tab         "Isogen\t2,400"    (game client copy, thousands separators)
//   consumed    "Isogen\t2400"
//   missing     "Isogen\t70"

use crate::entities::{same_material, BillItem, Job, NewBillItem};
use crate::parser::{group_thousands, parse_quantity};
use serde::Serialize;
use tracing::debug;

// ============================================================================
// MISSING MATERIALS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingMaterial {
    pub name: String,
    pub quantity: u64,
}

/// Outstanding shortfall of a job's BOM against what was already bought.
///
/// BOM order is kept; covered materials are left out. Requirements and
/// purchases are looked up the same way the expenditure matcher does, so a
/// material listed twice counts with its first line.
pub fn missing_materials(job: &Job) -> Vec<MissingMaterial> {
    job.bill_of_materials
        .iter()
        .enumerate()
        .filter(|(index, item)| {
            !job.bill_of_materials[..*index]
                .iter()
                .any(|earlier| same_material(&earlier.name, &item.name))
        })
        .filter_map(|(_, item)| {
            let missing = item
                .quantity
                .saturating_sub(job.expended_quantity(&item.name));
            (missing > 0).then(|| MissingMaterial {
                name: item.name.clone(),
                quantity: missing,
            })
        })
        .collect()
}

/// Every BOM line is covered by recorded expenditures
pub fn materials_satisfied(job: &Job) -> bool {
    missing_materials(job).is_empty()
}

// ============================================================================
// PARSERS
// ============================================================================

fn parse_bill_quantity(raw: &str) -> Option<u64> {
    parse_quantity(raw)
}

/// `Name Qty` per line; names may contain spaces
pub fn parse_bill_of_materials(text: &str) -> Vec<NewBillItem> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let (quantity, name) = parts.split_last()?;
            if name.is_empty() {
                return None;
            }
            let quantity = parse_bill_quantity(quantity)?;
            Some(NewBillItem::new(&name.join(" "), quantity))
        })
        .collect()
}

fn parse_tab_lines(text: &str) -> Vec<NewBillItem> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut items = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                debug!(line_number = index + 1, error = %err, "Skipping unreadable material line");
                continue;
            }
        };

        let (Some(name), Some(quantity)) = (record.get(0), record.get(1)) else {
            continue;
        };
        match parse_bill_quantity(quantity) {
            Some(quantity) if !name.is_empty() => items.push(NewBillItem::new(name, quantity)),
            _ => debug!(line_number = index + 1, "Skipping material line without a quantity"),
        }
    }
    items
}

/// `Name<TAB>2,400` per line, as copied from the game client
pub fn parse_bom_tab_separated(text: &str) -> Vec<NewBillItem> {
    parse_tab_lines(text)
}

/// `Name<TAB>Qty` per line
pub fn parse_consumed_materials(text: &str) -> Vec<NewBillItem> {
    parse_tab_lines(text)
}

/// Accept either BOM format: tab separated when any line has a tab
pub fn parse_bom_auto(text: &str) -> Vec<NewBillItem> {
    if text.contains('\t') {
        parse_bom_tab_separated(text)
    } else {
        parse_bill_of_materials(text)
    }
}

// ============================================================================
// EXPORTERS
// ============================================================================

pub fn export_bill_of_materials(items: &[BillItem]) -> String {
    items
        .iter()
        .map(|item| format!("{} {}", item.name, item.quantity))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn export_bom_tab_separated(items: &[BillItem]) -> String {
    items
        .iter()
        .map(|item| format!("{}\t{}", item.name, group_thousands(item.quantity)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn export_consumed_materials(items: &[BillItem]) -> String {
    items
        .iter()
        .map(|item| format!("{}\t{}", item.name, item.quantity))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn export_missing_materials(missing: &[MissingMaterial]) -> String {
    missing
        .iter()
        .map(|item| format!("{}\t{}", item.name, item.quantity))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{JobStatus, TransactionRecord};

    fn create_test_bill_item(name: &str, quantity: u64) -> BillItem {
        BillItem {
            id: format!("bom-{}", name),
            name: name.to_string(),
            quantity,
        }
    }

    fn create_test_expenditure(name: &str, quantity: u64) -> TransactionRecord {
        TransactionRecord {
            id: format!("tx-{}-{}", name, quantity),
            job_id: "job1".to_string(),
            date: "2025-07-04T10:58:00.000Z".to_string(),
            quantity,
            item_name: name.to_string(),
            unit_price: 5.0,
            total_price: 5.0 * quantity as f64,
            buyer: String::new(),
            location: String::new(),
            corporation: String::new(),
            wallet: String::new(),
            created: None,
        }
    }

    fn create_test_job(bom: Vec<BillItem>, expenditures: Vec<TransactionRecord>) -> Job {
        Job {
            id: "job1".to_string(),
            output_item: "Rifter".to_string(),
            output_quantity: 1,
            status: JobStatus::Acquisition,
            produced: 0,
            projected_cost: 0.0,
            projected_revenue: 0.0,
            job_start: None,
            job_end: None,
            sale_start: None,
            sale_end: None,
            runtime: None,
            created: None,
            bill_of_materials: bom,
            consumed_materials: vec![],
            expenditures,
            income: vec![],
        }
    }

    #[test]
    fn test_missing_materials_example() {
        let job = create_test_job(
            vec![create_test_bill_item("Tritanium", 100)],
            vec![create_test_expenditure("Tritanium", 30)],
        );

        assert_eq!(
            missing_materials(&job),
            vec![MissingMaterial {
                name: "Tritanium".to_string(),
                quantity: 70
            }]
        );
        assert!(!materials_satisfied(&job));
    }

    #[test]
    fn test_missing_materials_omits_covered_items() {
        let job = create_test_job(
            vec![
                create_test_bill_item("Tritanium", 100),
                create_test_bill_item("Pyerite", 50),
                create_test_bill_item("Mexallon", 10),
            ],
            vec![
                create_test_expenditure("tritanium", 60),
                create_test_expenditure("Tritanium", 60),
                create_test_expenditure("Pyerite", 20),
            ],
        );

        let missing = missing_materials(&job);

        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].name, "Pyerite");
        assert_eq!(missing[0].quantity, 30);
        assert_eq!(missing[1].name, "Mexallon");
        assert_eq!(missing[1].quantity, 10);
    }

    #[test]
    fn test_missing_materials_agrees_with_matcher_lookups() {
        let job = create_test_job(
            vec![
                create_test_bill_item("Tritanium", 100),
                create_test_bill_item("TRITANIUM", 500),
                create_test_bill_item("Pyerite", 10),
            ],
            vec![create_test_expenditure(" tritanium", 40)],
        );

        let missing = missing_materials(&job);

        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].name, "Tritanium");
        assert_eq!(missing[0].quantity, 60);
        let required = job.bom_requirement("tritanium").unwrap().quantity;
        assert_eq!(required - job.expended_quantity("tritanium"), missing[0].quantity);
    }

    #[test]
    fn test_parse_bill_of_materials_whitespace() {
        let items = parse_bill_of_materials("Tritanium 100\n\nNanite Repair Paste  12\nbroken\nIsogen x\n");

        assert_eq!(
            items,
            vec![
                NewBillItem::new("Tritanium", 100),
                NewBillItem::new("Nanite Repair Paste", 12),
            ]
        );
    }

    #[test]
    fn test_parse_bom_tab_separated() {
        let items = parse_bom_tab_separated("Isogen\t2,400\nMegacyte\t 15 \nno quantity\nZero\t0\n");

        assert_eq!(
            items,
            vec![NewBillItem::new("Isogen", 2400), NewBillItem::new("Megacyte", 15)]
        );
        assert_eq!(parse_bom_auto("Isogen\t2,400"), vec![NewBillItem::new("Isogen", 2400)]);
        assert_eq!(parse_bom_auto("Isogen 2400"), vec![NewBillItem::new("Isogen", 2400)]);
    }

    #[test]
    fn test_parse_consumed_materials() {
        let items = parse_consumed_materials("Tritanium\t90\r\nPyerite\t10\textra\n");
        assert_eq!(
            items,
            vec![NewBillItem::new("Tritanium", 90), NewBillItem::new("Pyerite", 10)]
        );
    }

    #[test]
    fn test_exports() {
        let items = vec![
            create_test_bill_item("Isogen", 2400),
            create_test_bill_item("Tritanium", 10),
        ];

        assert_eq!(export_bill_of_materials(&items), "Isogen 2400\nTritanium 10");
        assert_eq!(export_bom_tab_separated(&items), "Isogen\t2,400\nTritanium\t10");
        assert_eq!(export_consumed_materials(&items), "Isogen\t2400\nTritanium\t10");

        let missing = vec![MissingMaterial {
            name: "Isogen".to_string(),
            quantity: 70,
        }];
        assert_eq!(export_missing_materials(&missing), "Isogen\t70");
    }
}
