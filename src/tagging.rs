use std::cmp::Reverse;
use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;
use crate::models::{MatchType, TaggingRule};
use crate::rules::{activate_all_rules, load_active_rules};

/// Confidence lost for every rule that ties with the winner on both priority
/// and match specificity.
pub const TIE_PENALTY: f64 = 0.05;
pub const MIN_AMBIGUOUS_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub rule_id: Option<i64>,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub confidence: f64,
    pub needs_review: bool,
}

impl Classification {
    pub fn unmatched() -> Self {
        Self {
            rule_id: None,
            category_id: None,
            subcategory_id: None,
            confidence: 0.0,
            needs_review: true,
        }
    }
}

pub fn normalize_description(description: &str) -> String {
    description.trim().to_lowercase()
}

/// Rule patterns are compared against the normalized description, so they are
/// normalized the same way.
pub fn matches(normalized: &str, rule: &TaggingRule) -> bool {
    let pattern = normalize_description(&rule.pattern);
    if pattern.is_empty() {
        return false;
    }
    match rule.match_type {
        MatchType::Exact => normalized == pattern,
        MatchType::StartsWith => normalized.starts_with(&pattern),
        MatchType::Contains => normalized.contains(&pattern),
    }
}

/// Resolve zero or one category for a description. Inactive rules are ignored.
/// Resolution: priority desc, then specificity (exact > startsWith > contains),
/// then lowest id.
pub fn classify(description: &str, rules: &[TaggingRule]) -> Classification {
    let normalized = normalize_description(description);
    let mut matched: Vec<&TaggingRule> = rules
        .iter()
        .filter(|r| r.is_active && matches(&normalized, r))
        .collect();

    if matched.is_empty() {
        return Classification::unmatched();
    }
    matched.sort_by_key(|r| (Reverse(r.priority), Reverse(r.match_type.specificity()), r.id));

    let winner = matched[0];
    let ties = matched[1..]
        .iter()
        .filter(|r| {
            r.priority == winner.priority
                && r.match_type.specificity() == winner.match_type.specificity()
        })
        .count();
    let confidence = if ties == 0 {
        1.0
    } else {
        (1.0 - TIE_PENALTY * ties as f64).max(MIN_AMBIGUOUS_CONFIDENCE)
    };

    Classification {
        rule_id: Some(winner.id),
        category_id: Some(winner.category_id),
        subcategory_id: winner.subcategory_id,
        confidence,
        needs_review: false,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatch {
    pub rule_id: i64,
    pub pattern: String,
    pub match_type: MatchType,
    pub category_id: i64,
    pub subcategory_id: Option<i64>,
    pub confidence: f64,
}

/// Read-only lookup used during review: normalized description -> resolved rule.
pub fn preview(descriptions: &[String], rules: &[TaggingRule]) -> BTreeMap<String, Option<RuleMatch>> {
    let mut out = BTreeMap::new();
    for description in descriptions {
        let key = normalize_description(description);
        if key.is_empty() || out.contains_key(&key) {
            continue;
        }
        let result = classify(&key, rules);
        let resolved = result.rule_id.and_then(|id| {
            rules.iter().find(|r| r.id == id).map(|rule| RuleMatch {
                rule_id: rule.id,
                pattern: rule.pattern.clone(),
                match_type: rule.match_type,
                category_id: rule.category_id,
                subcategory_id: rule.subcategory_id,
                confidence: result.confidence,
            })
        });
        out.insert(key, resolved);
    }
    out
}

// ---------------------------------------------------------------------------
// Reapply against the ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCategorization {
    pub id: i64,
    pub description: String,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReapplyResult {
    pub updated: usize,
    pub total: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateAllResult {
    pub rules_activated: usize,
    pub updated: usize,
    pub total: usize,
    pub errors: Vec<String>,
}

/// Reclassify in place; only rows whose matched category differs are touched.
/// Rows no rule matches keep their current categorization. Returns the
/// positions of the changed rows.
pub fn reapply(existing: &mut [LedgerCategorization], rules: &[TaggingRule]) -> Vec<usize> {
    let mut changed = Vec::new();
    for (idx, txn) in existing.iter_mut().enumerate() {
        let result = classify(&txn.description, rules);
        if result.category_id.is_none() {
            continue;
        }
        if result.category_id != txn.category_id || result.subcategory_id != txn.subcategory_id {
            txn.category_id = result.category_id;
            txn.subcategory_id = result.subcategory_id;
            changed.push(idx);
        }
    }
    changed
}

fn load_ledger_categorizations(conn: &Connection) -> Result<Vec<LedgerCategorization>> {
    let mut stmt = conn.prepare(
        "SELECT id, description, category_id, subcategory_id FROM transactions ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(LedgerCategorization {
                id: row.get(0)?,
                description: row.get(1)?,
                category_id: row.get(2)?,
                subcategory_id: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Run the active rule set over every ledger description and persist changes.
/// A failed row write is reported in `errors` and does not stop the sweep.
pub fn reapply_ledger(conn: &Connection) -> Result<ReapplyResult> {
    let rules = load_active_rules(conn)?;
    let mut ledger = load_ledger_categorizations(conn)?;
    let changed = reapply(&mut ledger, &rules);

    let mut result = ReapplyResult {
        updated: 0,
        total: ledger.len(),
        errors: Vec::new(),
    };
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "UPDATE transactions SET category_id = ?1, subcategory_id = ?2 WHERE id = ?3",
        )?;
        for txn in changed.iter().map(|&idx| &ledger[idx]) {
            match stmt.execute(rusqlite::params![txn.category_id, txn.subcategory_id, txn.id]) {
                Ok(_) => result.updated += 1,
                Err(e) => result.errors.push(format!("transaction {}: {e}", txn.id)),
            }
        }
    }
    tx.commit()?;
    tracing::info!(
        updated = result.updated,
        total = result.total,
        errors = result.errors.len(),
        "Rules reapplied to ledger"
    );
    Ok(result)
}

pub fn activate_all_and_reapply(conn: &Connection) -> Result<ActivateAllResult> {
    let rules_activated = activate_all_rules(conn)?;
    let reapplied = reapply_ledger(conn)?;
    Ok(ActivateAllResult {
        rules_activated,
        updated: reapplied.updated,
        total: reapplied.total,
        errors: reapplied.errors,
    })
}

// ---------------------------------------------------------------------------
// Description frequency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionFrequency {
    pub description: String,
    pub count: i64,
    pub total_value: f64,
    pub rule_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrequencyFilter {
    All,
    Tagged,
    Untagged,
}

/// Distinct ledger descriptions, most frequent first, with the rule that
/// would tag each of them.
pub fn description_frequency(
    conn: &Connection,
    filter: FrequencyFilter,
) -> Result<Vec<DescriptionFrequency>> {
    let rules = load_active_rules(conn)?;
    let mut stmt = conn.prepare(
        "SELECT lower(trim(description)) AS d, count(*), sum(value) FROM transactions \
         GROUP BY d ORDER BY count(*) DESC, d",
    )?;
    let rows: Vec<(String, i64, f64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let out = rows
        .into_iter()
        .map(|(description, count, total_value)| {
            let rule_id = classify(&description, &rules).rule_id;
            DescriptionFrequency {
                description,
                count,
                total_value,
                rule_id,
            }
        })
        .filter(|f| match filter {
            FrequencyFilter::All => true,
            FrequencyFilter::Tagged => f.rule_id.is_some(),
            FrequencyFilter::Untagged => f.rule_id.is_none(),
        })
        .collect();
    Ok(out)
}

#[cfg(test)]
pub(crate) fn rule(id: i64, pattern: &str, match_type: MatchType, category_id: i64, priority: i64) -> TaggingRule {
    TaggingRule {
        id,
        pattern: pattern.to_string(),
        match_type,
        category_id,
        subcategory_id: None,
        priority,
        is_active: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{find_or_create_category, test_db};
    use crate::rules::{add_rule, NewRule};

    #[test]
    fn test_only_contains_rule_matches() {
        let a = rule(1, "uber", MatchType::Contains, 100, 5);
        let b = rule(2, "uber eats", MatchType::Exact, 200, 10);
        let result = classify("uber eats sp", &[a, b]);
        assert_eq!(result.category_id, Some(100));
        assert_eq!(result.confidence, 1.0);
        assert!(!result.needs_review);
    }

    #[test]
    fn test_no_match_needs_review() {
        let a = rule(1, "netflix", MatchType::Contains, 100, 0);
        let result = classify("RANDOM VENDOR XYZ", &[a]);
        assert_eq!(result, Classification::unmatched());
        assert_eq!(result.confidence, 0.0);
        assert!(result.needs_review);
    }

    #[test]
    fn test_description_is_trimmed_and_lowercased() {
        let a = rule(1, "ifood", MatchType::Exact, 7, 0);
        assert_eq!(classify("  IFOOD  ", &[a]).category_id, Some(7));
    }

    #[test]
    fn test_starts_with_requires_prefix() {
        let a = rule(1, "stripe", MatchType::StartsWith, 7, 0);
        assert_eq!(classify("STRIPE PAYMENT", &[a.clone()]).category_id, Some(7));
        assert_eq!(classify("PAY STRIPE FEE", &[a]).category_id, None);
    }

    #[test]
    fn test_higher_priority_wins() {
        let low = rule(1, "payment", MatchType::Exact, 1, 5);
        let high = rule(2, "payment", MatchType::Contains, 2, 10);
        let result = classify("payment received", &[low, high]);
        assert_eq!(result.category_id, Some(2));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_specificity_breaks_priority_ties() {
        let contains = rule(1, "uber", MatchType::Contains, 1, 5);
        let starts = rule(2, "uber", MatchType::StartsWith, 2, 5);
        let exact = rule(3, "uber eats", MatchType::Exact, 3, 5);
        let result = classify("uber eats", &[contains, starts, exact]);
        assert_eq!(result.category_id, Some(3));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_identical_tier_ties_break_to_lowest_id() {
        let rules = vec![
            rule(9, "market", MatchType::Contains, 90, 3),
            rule(4, "super", MatchType::Contains, 40, 3),
        ];
        let first = classify("supermarket extra", &rules);
        assert_eq!(first.rule_id, Some(4));
        assert_eq!(first.category_id, Some(40));
        assert!(first.confidence <= 0.95);
        for _ in 0..5 {
            assert_eq!(classify("supermarket extra", &rules), first);
        }
        let reversed: Vec<_> = rules.iter().rev().cloned().collect();
        assert_eq!(classify("supermarket extra", &reversed), first);
    }

    #[test]
    fn test_confidence_floor() {
        let rules: Vec<_> = (1..=20)
            .map(|id| rule(id, "a", MatchType::Contains, id, 0))
            .collect();
        assert_eq!(classify("aaa", &rules).confidence, MIN_AMBIGUOUS_CONFIDENCE);
    }

    #[test]
    fn test_inactive_rules_are_ignored() {
        let mut a = rule(1, "netflix", MatchType::Contains, 1, 0);
        a.is_active = false;
        assert!(classify("netflix.com", &[a]).needs_review);
    }

    #[test]
    fn test_preview_keys_by_normalized_description() {
        let rules = vec![rule(1, "uber", MatchType::Contains, 5, 0)];
        let descriptions = vec![
            "UBER TRIP".to_string(),
            "uber trip ".to_string(),
            "Bakery".to_string(),
        ];
        let out = preview(&descriptions, &rules);
        assert_eq!(out.len(), 2);
        assert_eq!(out["uber trip"].as_ref().map(|m| m.rule_id), Some(1));
        assert!(out["bakery"].is_none());
    }

    #[test]
    fn test_reapply_is_idempotent() {
        let rules = vec![rule(1, "uber", MatchType::Contains, 5, 0)];
        let mut ledger = vec![
            LedgerCategorization {
                id: 1,
                description: "Uber trip".to_string(),
                category_id: None,
                subcategory_id: None,
            },
            LedgerCategorization {
                id: 2,
                description: "Bakery".to_string(),
                category_id: Some(8),
                subcategory_id: None,
            },
        ];
        assert_eq!(reapply(&mut ledger, &rules), vec![0]);
        assert_eq!(ledger[0].category_id, Some(5));
        assert_eq!(ledger[1].category_id, Some(8));
        assert!(reapply(&mut ledger, &rules).is_empty());
    }

    fn insert_ledger_row(conn: &Connection, description: &str, value: f64) {
        conn.execute(
            "INSERT INTO transactions (bank, date, description, value, direction, fingerprint) \
             VALUES ('bofa', '2025-01-15', ?1, ?2, 'outcome', 'fp')",
            rusqlite::params![description, value],
        )
        .unwrap();
    }

    fn add(conn: &Connection, pattern: &str, category: &str, active: bool) -> i64 {
        add_rule(
            conn,
            &NewRule {
                pattern: pattern.to_string(),
                match_type: MatchType::Contains,
                category: category.to_string(),
                subcategory: None,
                priority: 0,
                is_active: active,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_reapply_ledger_second_run_updates_nothing() {
        let (_dir, conn) = test_db();
        insert_ledger_row(&conn, "ADOBE PHOTOSHOP", -20.0);
        insert_ledger_row(&conn, "ADOBE ILLUSTRATOR", -25.0);
        insert_ledger_row(&conn, "BAKERY", -5.0);
        add(&conn, "adobe", "software", true);

        let first = reapply_ledger(&conn).unwrap();
        assert_eq!(first.updated, 2);
        assert_eq!(first.total, 3);
        let second = reapply_ledger(&conn).unwrap();
        assert_eq!(second.updated, 0);
        assert_eq!(second.total, 3);
    }

    #[test]
    fn test_reapply_ledger_touches_only_changed_rows() {
        let (_dir, conn) = test_db();
        for i in 0..600 {
            let description = if i % 3 == 0 { format!("ADOBE {i}") } else { format!("SHOP {i}") };
            insert_ledger_row(&conn, &description, -1.0);
        }
        add(&conn, "adobe", "software", true);

        let result = reapply_ledger(&conn).unwrap();
        assert_eq!(result.total, 600);
        assert_eq!(result.updated, 200);
        assert!(result.errors.is_empty());
        let software = find_or_create_category(&conn, "software").unwrap();
        let tagged: i64 = conn
            .query_row(
                "SELECT count(*) FROM transactions WHERE category_id = ?1",
                [software],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tagged, 200);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_activate_all_and_reapply() {
        let (_dir, conn) = test_db();
        insert_ledger_row(&conn, "NETFLIX.COM", -15.0);
        add(&conn, "netflix", "streaming", false);
        assert_eq!(reapply_ledger(&conn).unwrap().updated, 0);

        let result = activate_all_and_reapply(&conn).unwrap();
        assert_eq!(result.rules_activated, 1);
        assert_eq!(result.updated, 1);
        let streaming = find_or_create_category(&conn, "streaming").unwrap();
        let cat: Option<i64> = conn
            .query_row("SELECT category_id FROM transactions LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(cat, Some(streaming));
    }

    #[test]
    fn test_description_frequency_filters() {
        let (_dir, conn) = test_db();
        insert_ledger_row(&conn, "Uber Trip", -10.0);
        insert_ledger_row(&conn, "uber trip", -15.0);
        insert_ledger_row(&conn, "Bakery", -5.0);
        add(&conn, "uber", "transport", true);

        let all = description_frequency(&conn, FrequencyFilter::All).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].description, "uber trip");
        assert_eq!(all[0].count, 2);
        assert_eq!(all[0].total_value, -25.0);

        let untagged = description_frequency(&conn, FrequencyFilter::Untagged).unwrap();
        assert_eq!(untagged.len(), 1);
        assert_eq!(untagged[0].description, "bakery");
    }
}
