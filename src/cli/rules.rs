use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::{open, print_json};
use crate::error::{Result, TallyError};
use crate::fmt::{amount, percent};
use crate::models::MatchType;
use crate::rules::{add_rule, delete_rule, get_rule, list_rules, load_active_rules, update_rule, NewRule, RuleUpdate};
use crate::tagging::{activate_all_and_reapply, description_frequency, preview as preview_rules, reapply_ledger, FrequencyFilter};

fn parse_match_type(raw: &str) -> Result<MatchType> {
    MatchType::parse(raw).ok_or_else(|| {
        TallyError::InvalidRule(format!("unknown match type '{raw}' (exact, startsWith, contains)"))
    })
}

pub struct AddArgs<'a> {
    pub pattern: &'a str,
    pub category: &'a str,
    pub subcategory: Option<&'a str>,
    pub match_type: &'a str,
    pub priority: i64,
    pub inactive: bool,
}

pub fn add(args: AddArgs, json: bool) -> Result<()> {
    let ctx = open()?;
    let id = add_rule(
        &ctx.conn,
        &NewRule {
            pattern: args.pattern.to_string(),
            match_type: parse_match_type(args.match_type)?,
            category: args.category.to_string(),
            subcategory: args.subcategory.map(str::to_string),
            priority: args.priority,
            is_active: !args.inactive,
        },
    )?;
    let rule = get_rule(&ctx.conn, id)?;
    if json {
        return print_json(&rule);
    }
    println!("Added rule {id}: '{}' \u{2192} {}", rule.pattern, args.category.trim().to_lowercase());
    Ok(())
}

pub fn list(json: bool) -> Result<()> {
    let ctx = open()?;
    let rules = list_rules(&ctx.conn)?;
    if json {
        return print_json(&rules);
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Pattern", "Type", "Category", "Subcategory", "Priority", "Active"]);
    for r in rules {
        table.add_row(vec![
            Cell::new(r.rule.id),
            Cell::new(r.rule.pattern),
            Cell::new(r.rule.match_type.as_str()),
            Cell::new(r.category),
            Cell::new(r.subcategory.unwrap_or_default()),
            Cell::new(r.rule.priority),
            Cell::new(if r.rule.is_active { "yes" } else { "no" }),
        ]);
    }
    println!("Tagging rules\n{table}");
    Ok(())
}

pub fn update(id: i64, update: RuleUpdateArgs, json: bool) -> Result<()> {
    let ctx = open()?;
    let match_type = update.match_type.as_deref().map(parse_match_type).transpose()?;
    let rule = update_rule(
        &ctx.conn,
        id,
        &RuleUpdate {
            pattern: update.pattern,
            match_type,
            category: update.category,
            subcategory: update.subcategory,
            priority: update.priority,
            is_active: update.active,
        },
    )?;
    if json {
        return print_json(&rule);
    }
    println!("Updated rule {id}");
    Ok(())
}

pub struct RuleUpdateArgs {
    pub pattern: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub match_type: Option<String>,
    pub priority: Option<i64>,
    pub active: Option<bool>,
}

pub fn delete(id: i64) -> Result<()> {
    let ctx = open()?;
    delete_rule(&ctx.conn, id)?;
    println!("Deleted rule {id}");
    Ok(())
}

pub fn preview(descriptions: &[String], json: bool) -> Result<()> {
    let ctx = open()?;
    let rules = load_active_rules(&ctx.conn)?;
    let matches = preview_rules(descriptions, &rules);
    if json {
        return print_json(&matches);
    }

    let mut table = Table::new();
    table.set_header(vec!["Description", "Rule", "Pattern", "Type", "Conf."]);
    for (description, resolved) in matches {
        match resolved {
            Some(m) => table.add_row(vec![
                Cell::new(description),
                Cell::new(m.rule_id),
                Cell::new(m.pattern),
                Cell::new(m.match_type.as_str()),
                Cell::new(percent(m.confidence)),
            ]),
            None => table.add_row(vec![
                Cell::new(description),
                Cell::new("no match".yellow().to_string()),
                Cell::new(""),
                Cell::new(""),
                Cell::new(percent(0.0)),
            ]),
        };
    }
    println!("{table}");
    Ok(())
}

pub fn frequency(filter: &str, json: bool) -> Result<()> {
    let filter = match filter {
        "all" => FrequencyFilter::All,
        "tagged" => FrequencyFilter::Tagged,
        "untagged" => FrequencyFilter::Untagged,
        other => {
            return Err(TallyError::Settings(format!(
                "unknown filter '{other}' (all, tagged, untagged)"
            )))
        }
    };
    let ctx = open()?;
    let rows = description_frequency(&ctx.conn, filter)?;
    if json {
        return print_json(&rows);
    }

    let mut table = Table::new();
    table.set_header(vec!["Description", "Count", "Total", "Rule"]);
    for r in rows {
        table.add_row(vec![
            Cell::new(r.description),
            Cell::new(r.count),
            Cell::new(amount(r.total_value)),
            Cell::new(r.rule_id.map(|id| id.to_string()).unwrap_or_default()),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub fn reapply(json: bool) -> Result<()> {
    let ctx = open()?;
    let result = reapply_ledger(&ctx.conn)?;
    if json {
        return print_json(&result);
    }
    println!("{} of {} ledger transactions recategorized", result.updated, result.total);
    for e in &result.errors {
        println!("{} {e}", "Failed".red());
    }
    Ok(())
}

pub fn activate_all(json: bool) -> Result<()> {
    let ctx = open()?;
    let result = activate_all_and_reapply(&ctx.conn)?;
    if json {
        return print_json(&result);
    }
    println!("{} rules activated", result.rules_activated);
    println!("{} of {} ledger transactions recategorized", result.updated, result.total);
    for e in &result.errors {
        println!("{} {e}", "Failed".red());
    }
    Ok(())
}
