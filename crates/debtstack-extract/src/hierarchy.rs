//! Hierarchy extraction from Exhibit 21 indentation plus an LLM gap-fill
//! pass restricted to orphan issuers and guarantors.

use crate::core::request_json;
use crate::error::Result;
use crate::prompts;
use debtstack_data::sections::exhibit21::SubsidiaryRow;
use debtstack_data::store::slugify;
use debtstack_llm::coerce::{as_clean_string, as_float, ensure_array};
use debtstack_llm::{ChatClient, ModelTier, UsageRecord};
use std::collections::HashSet;
use tracing::{debug, info};

/// One proposed ownership edge.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyEdge {
    /// Parent entity name
    pub parent: String,
    /// Child entity name
    pub child: String,
    /// "direct"/"indirect" only when the source says the word
    pub ownership_type: Option<String>,
    /// Ownership percent, when disclosed
    pub ownership_percent: Option<f64>,
    /// Verbatim supporting text (required for a non-null ownership_type)
    pub evidence: Option<String>,
}

/// Result of the hierarchy pass.
#[derive(Debug, Clone, Default)]
pub struct HierarchyExtraction {
    /// Proposed edges
    pub edges: Vec<HierarchyEdge>,
    /// Root entity name (depth-0 ancestor of the exhibit), when evident
    pub root: Option<String>,
}

/// Build parent/child edges from Exhibit 21 indentation.
///
/// Depth transitions drive a parent stack: a row at depth d+1 hangs off the
/// nearest preceding row at depth d. Rows that skip levels attach to the
/// deepest shallower ancestor. Indentation alone never claims direct vs
/// indirect ownership.
pub fn edges_from_indentation(registrant: &str, rows: &[SubsidiaryRow]) -> HierarchyExtraction {
    let mut extraction = HierarchyExtraction {
        edges: Vec::new(),
        root: Some(registrant.to_string()),
    };
    // (depth, name) stack of open ancestors; the registrant sits above
    // every depth-0 row.
    let mut stack: Vec<(u32, String)> = Vec::new();

    for row in rows {
        while let Some((depth, _)) = stack.last() {
            if *depth >= row.depth {
                stack.pop();
            } else {
                break;
            }
        }
        let parent = stack
            .last()
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| registrant.to_string());

        extraction.edges.push(HierarchyEdge {
            parent,
            child: row.name.clone(),
            ownership_type: None,
            ownership_percent: None,
            evidence: None,
        });
        stack.push((row.depth, row.name.clone()));
    }

    extraction
}

/// Entities with no inbound edge that matter enough to chase: issuers and
/// guarantors first, bounded to keep the gap-fill prompt scoped.
pub fn orphan_entities<'a>(
    all_entities: &'a [(String, bool)],
    edges: &[HierarchyEdge],
    limit: usize,
) -> Vec<&'a str> {
    let children: HashSet<String> = edges.iter().map(|e| slugify(&e.child)).collect();
    let mut orphans: Vec<(&str, bool)> = all_entities
        .iter()
        .filter(|(name, _)| !children.contains(&slugify(name)))
        .map(|(name, high_value)| (name.as_str(), *high_value))
        .collect();
    // High-value (issuer/guarantor) orphans first.
    orphans.sort_by_key(|(_, high_value)| std::cmp::Reverse(*high_value));
    orphans.into_iter().take(limit).map(|(name, _)| name).collect()
}

/// LLM gap-fill over orphan entities. Only parents from the known entity
/// list are accepted, and `direct`/`indirect` requires evidence text.
pub async fn fill_orphans(
    client: &dyn ChatClient,
    orphans: &[&str],
    known_entities: &[String],
    source_text: &str,
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<Vec<HierarchyEdge>> {
    if orphans.is_empty() {
        return Ok(Vec::new());
    }

    let user = format!(
        "Entities needing a parent:\n{}\n\nCandidate entity list:\n{}\n\nSource text:\n{}",
        orphans.join("\n"),
        known_entities.join("\n"),
        source_text
    );

    let (value, _) = request_json(
        client,
        "hierarchy",
        prompts::SYSTEM_HIERARCHY,
        &user,
        tier,
        usage,
    )
    .await?;

    let known: HashSet<String> = known_entities.iter().map(|n| slugify(n)).collect();
    let mut edges = Vec::new();

    for item in ensure_array(&value["assignments"]) {
        let Some(child) = as_clean_string(&item["entity"]) else {
            continue;
        };
        let Some(parent) = as_clean_string(&item["parent"]) else {
            continue;
        };
        if !known.contains(&slugify(&parent)) {
            debug!(parent, "gap-fill proposed unknown parent; dropped");
            continue;
        }
        let evidence = as_clean_string(&item["evidence"]);
        let ownership_type = as_clean_string(&item["ownership_type"])
            .map(|t| t.to_lowercase())
            .filter(|t| t == "direct" || t == "indirect")
            // The explicit word must appear in the quoted evidence.
            .filter(|t| {
                evidence
                    .as_deref()
                    .is_some_and(|e| e.to_lowercase().contains(t.as_str()))
            });

        edges.push(HierarchyEdge {
            parent,
            child,
            ownership_type,
            ownership_percent: as_float(&item["ownership_percent"]),
            evidence,
        });
    }

    info!(filled = edges.len(), asked = orphans.len(), "hierarchy gap-fill complete");
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedClient;

    fn row(name: &str, depth: u32) -> SubsidiaryRow {
        SubsidiaryRow {
            name: name.to_string(),
            jurisdiction: None,
            depth,
        }
    }

    #[test]
    fn test_indentation_to_edges() {
        let rows = vec![
            row("Acme Intermediate LLC", 0),
            row("Acme Operating LP", 1),
            row("Acme Finance LLC", 2),
            row("Acme International BV", 1),
            row("Acme Japan KK", 0),
        ];
        let extraction = edges_from_indentation("Acme Holdings Inc.", &rows);
        let edges: Vec<(&str, &str)> = extraction
            .edges
            .iter()
            .map(|e| (e.parent.as_str(), e.child.as_str()))
            .collect();
        assert_eq!(
            edges,
            vec![
                ("Acme Holdings Inc.", "Acme Intermediate LLC"),
                ("Acme Intermediate LLC", "Acme Operating LP"),
                ("Acme Operating LP", "Acme Finance LLC"),
                ("Acme Intermediate LLC", "Acme International BV"),
                ("Acme Holdings Inc.", "Acme Japan KK"),
            ]
        );
        assert_eq!(extraction.root.as_deref(), Some("Acme Holdings Inc."));
        // Indentation never claims direct/indirect.
        assert!(extraction.edges.iter().all(|e| e.ownership_type.is_none()));
    }

    #[test]
    fn test_level_skip_attaches_to_ancestor() {
        let rows = vec![
            row("Acme Intermediate LLC", 0),
            row("Deeply Indented Sub", 3),
        ];
        let extraction = edges_from_indentation("Acme Holdings Inc.", &rows);
        assert_eq!(extraction.edges[1].parent, "Acme Intermediate LLC");
    }

    #[test]
    fn test_orphans_prioritize_high_value() {
        let entities = vec![
            ("Acme Operating LP".to_string(), false),
            ("Acme Finance LLC".to_string(), true),
            ("Acme Shelf Co".to_string(), false),
        ];
        let edges = vec![HierarchyEdge {
            parent: "Acme Holdings Inc.".to_string(),
            child: "Acme Operating LP".to_string(),
            ownership_type: None,
            ownership_percent: None,
            evidence: None,
        }];
        let orphans = orphan_entities(&entities, &edges, 1);
        assert_eq!(orphans, vec!["Acme Finance LLC"]);
    }

    #[tokio::test]
    async fn test_gap_fill_drops_unknown_parent_and_unevidenced_type() {
        let client = ScriptedClient::new(vec![
            r#"{"assignments": [
                {"entity": "Acme Finance LLC", "parent": "Acme Holdings Inc.",
                 "ownership_type": "direct",
                 "evidence": "Acme Finance LLC is a direct wholly owned subsidiary of Acme Holdings Inc."},
                {"entity": "Acme Shelf Co", "parent": "Phantom Parent Corp", "evidence": "..."},
                {"entity": "Acme Japan KK", "parent": "Acme Holdings Inc.",
                 "ownership_type": "indirect", "evidence": "Acme Japan KK is a subsidiary."}
            ]}"#,
        ]);
        let known = vec!["Acme Holdings Inc.".to_string(), "Acme Finance LLC".to_string(), "Acme Japan KK".to_string()];
        let mut usage = UsageRecord::default();
        let edges = fill_orphans(
            &client,
            &["Acme Finance LLC", "Acme Shelf Co", "Acme Japan KK"],
            &known,
            "source",
            ModelTier::Fast,
            &mut usage,
        )
        .await
        .unwrap();

        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].ownership_type.as_deref(), Some("direct"));
        // "indirect" claimed without the word in evidence: nulled.
        assert_eq!(edges[1].child, "Acme Japan KK");
        assert!(edges[1].ownership_type.is_none());
    }
}
