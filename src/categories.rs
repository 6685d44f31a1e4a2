use crate::models::{CategoryNode, Marketplace};
use serde::Deserialize;
use std::collections::BTreeMap;

/// One entry of a marketplace's flat category listing before tree assembly.
#[derive(Debug, Clone, Deserialize)]
pub struct FlatCategory {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl FlatCategory {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parent_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: parent_id.map(|value| value.to_string()),
        }
    }
}

/// Rebuild parent/child structure from a flat category list.
///
/// Two passes: instantiate one node per entry indexed by id, then attach each
/// entry to its parent's children. An entry whose `parent_id` does not
/// resolve in the index is promoted to a root rather than dropped. `path` is
/// filled afterwards by a depth-first walk accumulating ancestor names.
pub fn build_tree(flat: Vec<FlatCategory>) -> Vec<CategoryNode> {
    let mut nodes: BTreeMap<String, CategoryNode> = BTreeMap::new();
    let mut order: Vec<String> = Vec::with_capacity(flat.len());
    for entry in &flat {
        // last occurrence of a duplicated id wins; order keeps the first slot
        if !nodes.contains_key(&entry.id) {
            order.push(entry.id.clone());
        }
        nodes.insert(
            entry.id.clone(),
            CategoryNode {
                id: entry.id.clone(),
                name: entry.name.clone(),
                parent_id: entry.parent_id.clone(),
                path: Vec::new(),
                children: Vec::new(),
                required_attributes: Vec::new(),
            },
        );
    }

    let mut children_of: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut roots: Vec<String> = Vec::new();
    for id in &order {
        let parent = nodes.get(id).and_then(|node| node.parent_id.clone());
        match parent {
            Some(parent_id) if nodes.contains_key(&parent_id) && parent_id != *id => {
                children_of.entry(parent_id).or_default().push(id.clone());
            }
            // orphaned parent reference: keep the node as a root
            _ => roots.push(id.clone()),
        }
    }

    let mut result = Vec::with_capacity(roots.len());
    for root_id in roots {
        result.push(assemble(&root_id, &mut nodes, &children_of, &[]));
    }
    result
}

fn assemble(
    id: &str,
    nodes: &mut BTreeMap<String, CategoryNode>,
    children_of: &BTreeMap<String, Vec<String>>,
    ancestors: &[String],
) -> CategoryNode {
    let mut node = nodes
        .remove(id)
        .unwrap_or_else(|| CategoryNode {
            id: id.to_string(),
            name: String::new(),
            parent_id: None,
            path: Vec::new(),
            children: Vec::new(),
            required_attributes: Vec::new(),
        });
    let mut path = ancestors.to_vec();
    path.push(node.name.clone());
    node.path = path.clone();
    if let Some(child_ids) = children_of.get(id) {
        for child_id in child_ids {
            node.children
                .push(assemble(child_id, nodes, children_of, &path));
        }
    }
    node
}

/// Flatten a tree back to `(id, parent_id)` pairs, depth-first. Used by the
/// advisor to bound its grounding sample and by tests.
pub fn flatten(tree: &[CategoryNode]) -> Vec<(String, Option<String>)> {
    let mut out = Vec::new();
    for node in tree {
        walk(node, &mut out);
    }
    out
}

fn walk(node: &CategoryNode, out: &mut Vec<(String, Option<String>)>) {
    out.push((node.id.clone(), node.parent_id.clone()));
    for child in &node.children {
        walk(child, out);
    }
}

/// Collect leaf nodes with their full display path, e.g.
/// `"Elektronik > Telefon > Aksesuar"`.
pub fn leaf_paths(tree: &[CategoryNode]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for node in tree {
        collect_leaves(node, &mut out);
    }
    out
}

fn collect_leaves(node: &CategoryNode, out: &mut Vec<(String, String)>) {
    if node.children.is_empty() {
        out.push((node.id.clone(), node.path.join(" > ")));
    } else {
        for child in &node.children {
            collect_leaves(child, out);
        }
    }
}

/// Static fallback trees, used when a marketplace has no live category API
/// or when no connection exists yet. Versioned data, injected by callers so
/// tests can substitute their own.
pub fn fallback_tree(marketplace: Marketplace) -> Vec<CategoryNode> {
    let entries: &[(&str, &str, Option<&str>)] = match marketplace {
        Marketplace::Shopify => &[
            ("home", "Home & Living", None),
            ("apparel", "Apparel & Accessories", None),
            ("electronics", "Electronics", None),
            ("beauty", "Health & Beauty", None),
            ("toys", "Toys & Games", None),
        ],
        Marketplace::Etsy => &[
            ("69150467", "Home & Living", None),
            ("69150425", "Jewelry", None),
            ("69150455", "Art & Collectibles", None),
            ("69150353", "Clothing", None),
            ("69154815", "Craft Supplies & Tools", None),
        ],
        Marketplace::Ciceksepeti => &[
            ("1", "Çiçek", None),
            ("2", "Hediye", None),
            ("21", "Kişiye Özel Hediye", Some("2")),
            ("3", "Yenilebilir Çiçek", None),
        ],
        _ => &[
            ("1000", "Elektronik", None),
            ("1001", "Telefon ve Aksesuar", Some("1000")),
            ("1002", "Bilgisayar", Some("1000")),
            ("2000", "Giyim", None),
            ("2001", "Kadın Giyim", Some("2000")),
            ("2002", "Erkek Giyim", Some("2000")),
            ("3000", "Ev ve Yaşam", None),
            ("4000", "Kozmetik", None),
        ],
    };
    build_tree(
        entries
            .iter()
            .map(|(id, name, parent)| FlatCategory::new(*id, *name, *parent))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<FlatCategory> {
        vec![
            FlatCategory::new("1", "Elektronik", None),
            FlatCategory::new("2", "Telefon", Some("1")),
            FlatCategory::new("3", "Aksesuar", Some("2")),
            FlatCategory::new("4", "Giyim", None),
            FlatCategory::new("5", "Kadın", Some("4")),
        ]
    }

    #[test]
    fn tree_round_trip_recovers_relationships() {
        let tree = build_tree(sample());
        let mut flat = flatten(&tree);
        flat.sort();
        let mut expected: Vec<(String, Option<String>)> = sample()
            .into_iter()
            .map(|entry| (entry.id, entry.parent_id))
            .collect();
        expected.sort();
        assert_eq!(flat, expected);
    }

    #[test]
    fn paths_are_root_to_node_name_sequences() {
        let tree = build_tree(sample());
        let electronics = tree.iter().find(|node| node.id == "1").unwrap();
        assert_eq!(electronics.path, vec!["Elektronik"]);
        let phones = &electronics.children[0];
        assert_eq!(phones.path, vec!["Elektronik", "Telefon"]);
        let accessories = &phones.children[0];
        assert_eq!(
            accessories.path,
            vec!["Elektronik", "Telefon", "Aksesuar"]
        );
        assert!(accessories.children.is_empty());
    }

    #[test]
    fn orphaned_parent_becomes_root() {
        let mut flat = sample();
        flat.push(FlatCategory::new("9", "Kayıp", Some("404")));
        let tree = build_tree(flat);
        let orphan = tree.iter().find(|node| node.id == "9").unwrap();
        assert_eq!(orphan.path, vec!["Kayıp"]);
        assert_eq!(flatten(&tree).len(), 6);
    }

    #[test]
    fn self_referencing_entry_is_a_root_not_a_cycle() {
        let tree = build_tree(vec![FlatCategory::new("7", "Döngü", Some("7"))]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].path, vec!["Döngü"]);
    }

    #[test]
    fn stable_under_reinvocation() {
        let first = build_tree(sample());
        let second = build_tree(sample());
        assert_eq!(first, second);
    }

    #[test]
    fn leaf_paths_join_names() {
        let tree = build_tree(sample());
        let leaves = leaf_paths(&tree);
        assert!(leaves
            .iter()
            .any(|(id, path)| id == "3" && path == "Elektronik > Telefon > Aksesuar"));
        assert!(leaves.iter().all(|(id, _)| id != "1"));
    }

    #[test]
    fn fallback_trees_exist_for_all_marketplaces() {
        for marketplace in Marketplace::ALL {
            let tree = fallback_tree(marketplace);
            assert!(!tree.is_empty(), "no fallback for {}", marketplace.slug());
            assert!(tree.iter().all(|node| !node.path.is_empty()));
        }
    }
}
