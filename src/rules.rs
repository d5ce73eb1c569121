use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db::{find_or_create_category, find_or_create_subcategory};
use crate::error::{Result, TallyError};
use crate::models::{MatchType, TaggingRule};

#[derive(Debug, Clone)]
pub struct NewRule {
    pub pattern: String,
    pub match_type: MatchType,
    pub category: String,
    pub subcategory: Option<String>,
    pub priority: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    pub pattern: Option<String>,
    pub match_type: Option<MatchType>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub priority: Option<i64>,
    pub is_active: Option<bool>,
}

/// A rule joined with its category names, for listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleListing {
    #[serde(flatten)]
    pub rule: TaggingRule,
    pub category: String,
    pub subcategory: Option<String>,
}

const RULE_COLUMNS: &str = "r.id, r.pattern, r.match_type, r.category_id, r.subcategory_id, r.priority, r.is_active";

fn rule_from_row(row: &Row) -> rusqlite::Result<TaggingRule> {
    let raw_type: String = row.get(2)?;
    Ok(TaggingRule {
        id: row.get(0)?,
        pattern: row.get(1)?,
        match_type: MatchType::parse(&raw_type).unwrap_or(MatchType::Contains),
        category_id: row.get(3)?,
        subcategory_id: row.get(4)?,
        priority: row.get(5)?,
        is_active: row.get(6)?,
    })
}

fn normalize_pattern(pattern: &str) -> String {
    pattern.trim().to_lowercase()
}

/// Immutable snapshot handed to the tagging engine.
pub fn load_active_rules(conn: &Connection) -> Result<Vec<TaggingRule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RULE_COLUMNS} FROM tagging_rules r WHERE r.is_active = 1 ORDER BY r.id"
    ))?;
    let rules = stmt
        .query_map([], rule_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rules)
}

pub fn list_rules(conn: &Connection) -> Result<Vec<RuleListing>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RULE_COLUMNS}, c.name, s.name FROM tagging_rules r \
         JOIN categories c ON r.category_id = c.id \
         LEFT JOIN subcategories s ON r.subcategory_id = s.id \
         ORDER BY r.priority DESC, r.id"
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RuleListing {
                rule: rule_from_row(row)?,
                category: row.get(7)?,
                subcategory: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_rule(conn: &Connection, id: i64) -> Result<TaggingRule> {
    conn.query_row(
        &format!("SELECT {RULE_COLUMNS} FROM tagging_rules r WHERE r.id = ?1"),
        [id],
        rule_from_row,
    )
    .optional()?
    .ok_or(TallyError::UnknownRule(id))
}

pub fn add_rule(conn: &Connection, rule: &NewRule) -> Result<i64> {
    let pattern = normalize_pattern(&rule.pattern);
    if pattern.is_empty() {
        return Err(TallyError::InvalidRule("pattern must not be empty".to_string()));
    }
    let category_id = find_or_create_category(conn, &rule.category)?;
    let subcategory_id = rule
        .subcategory
        .as_deref()
        .map(|name| find_or_create_subcategory(conn, name))
        .transpose()?;
    conn.execute(
        "INSERT INTO tagging_rules (pattern, match_type, category_id, subcategory_id, priority, is_active) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            pattern,
            rule.match_type.as_str(),
            category_id,
            subcategory_id,
            rule.priority,
            rule.is_active
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_rule(conn: &Connection, id: i64, update: &RuleUpdate) -> Result<TaggingRule> {
    let mut rule = get_rule(conn, id)?;
    if let Some(pattern) = &update.pattern {
        rule.pattern = normalize_pattern(pattern);
    }
    if let Some(match_type) = update.match_type {
        rule.match_type = match_type;
    }
    if let Some(category) = &update.category {
        rule.category_id = find_or_create_category(conn, category)?;
    }
    if let Some(subcategory) = &update.subcategory {
        rule.subcategory_id = if subcategory.trim().is_empty() {
            None
        } else {
            Some(find_or_create_subcategory(conn, subcategory)?)
        };
    }
    if let Some(priority) = update.priority {
        rule.priority = priority;
    }
    if let Some(active) = update.is_active {
        rule.is_active = active;
    }
    conn.execute(
        "UPDATE tagging_rules SET pattern = ?1, match_type = ?2, category_id = ?3, \
         subcategory_id = ?4, priority = ?5, is_active = ?6 WHERE id = ?7",
        rusqlite::params![
            rule.pattern,
            rule.match_type.as_str(),
            rule.category_id,
            rule.subcategory_id,
            rule.priority,
            rule.is_active,
            id
        ],
    )?;
    Ok(rule)
}

pub fn delete_rule(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn.execute("DELETE FROM tagging_rules WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(TallyError::UnknownRule(id));
    }
    Ok(())
}

/// Flip every inactive rule on; returns how many changed.
pub fn activate_all_rules(conn: &Connection) -> Result<usize> {
    let changed = conn.execute("UPDATE tagging_rules SET is_active = 1 WHERE is_active = 0", [])?;
    Ok(changed)
}
