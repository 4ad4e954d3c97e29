//! Plan serialization
//!
//! Converts a plan to the JSON explain document and back. The document is
//! the cross-process plan format: a coordinator serializes the chosen plan
//! and ships the parts to the executors, which deserialize them against
//! their own catalog. Deserialization is the exact inverse of
//! serialization and validates every referenced collection and index.
//!
//! Layout:
//!
//! ```text
//! { "nodes": [...],            operator entries, inputs before consumers
//!   "rules": [...],            applied optimizer rules, in order
//!   "collections": [...],      {name, type} with type read|write
//!   "variables": [...],        {id, name}
//!   "estimatedCost": ...,      root totals
//!   "estimatedNrItems": ... }
//! ```
//!
//! Subquery nodes nest their plan under a `subquery` key, so the top-level
//! `nodes` list contains the main chain only.

use crate::ast::{Expr, ModificationOptions};
use crate::catalog::{Catalog, CollectionAccess};
use crate::error::{PlannerError, PlannerResult};
use crate::plan::node::{NodeId, NodeKind, SortEntry};
use crate::plan::ranges::RangeSet;
use crate::plan::ExecutionPlan;
use crate::variable::{Variable, VariableId, VariableRegistry};
use serde_json::{json, Map, Value};

// ----------------------------------------------------------------------
// Serialization
// ----------------------------------------------------------------------

/// Serialize a plan into its explain document.
pub fn to_json(plan: &ExecutionPlan, registry: &VariableRegistry) -> PlannerResult<Value> {
    let root = plan.root();
    let nodes = chain_to_json(plan, registry, root)?;
    let collections: Vec<Value> = plan
        .collections
        .iter()
        .map(|(name, access)| {
            json!({
                "name": name,
                "type": match access {
                    CollectionAccess::Read => "read",
                    CollectionAccess::Write => "write",
                },
            })
        })
        .collect();
    let variables: Vec<Value> = registry
        .iter()
        .map(|v| json!({"id": v.id.0, "name": v.name}))
        .collect();
    let (nr_items, cost) = plan.root_estimate();
    Ok(json!({
        "nodes": nodes,
        "rules": plan.applied_rules,
        "collections": collections,
        "variables": variables,
        "estimatedCost": cost.unwrap_or(0.0),
        "estimatedNrItems": nr_items.unwrap_or(0),
    }))
}

fn chain_to_json(
    plan: &ExecutionPlan,
    registry: &VariableRegistry,
    from: NodeId,
) -> PlannerResult<Vec<Value>> {
    plan.execution_order(from)
        .into_iter()
        .map(|id| node_to_json(plan, registry, id))
        .collect()
}

fn variable_json(registry: &VariableRegistry, id: VariableId) -> PlannerResult<Value> {
    let variable = registry
        .get(id)
        .ok_or_else(|| PlannerError::internal(format!("variable #{id} not in registry")))?;
    Ok(json!({"id": variable.id.0, "name": variable.name}))
}

fn optional_variable_json(
    registry: &VariableRegistry,
    id: Option<VariableId>,
) -> PlannerResult<Value> {
    match id {
        Some(id) => variable_json(registry, id),
        None => Ok(Value::Null),
    }
}

fn expr_json(expr: &Expr) -> PlannerResult<Value> {
    serde_json::to_value(expr).map_err(|e| PlannerError::internal(e.to_string()))
}

fn sort_elements_json(
    registry: &VariableRegistry,
    elements: &[SortEntry],
) -> PlannerResult<Value> {
    let values: Vec<Value> = elements
        .iter()
        .map(|entry| {
            Ok(json!({
                "inVariable": variable_json(registry, entry.variable)?,
                "ascending": entry.ascending,
            }))
        })
        .collect::<PlannerResult<_>>()?;
    Ok(Value::Array(values))
}

fn options_json(options: &ModificationOptions) -> Value {
    json!({
        "waitForSync": options.wait_for_sync,
        "ignoreErrors": options.ignore_errors,
        "keepNull": options.keep_null,
        "mergeObjects": options.merge_objects,
    })
}

fn node_to_json(
    plan: &ExecutionPlan,
    registry: &VariableRegistry,
    id: NodeId,
) -> PlannerResult<Value> {
    let node = plan.node(id);
    let mut entry = Map::new();
    entry.insert("type".to_string(), json!(node.kind.type_name()));
    entry.insert("id".to_string(), json!(node.id.0));
    entry.insert(
        "dependencies".to_string(),
        json!(node.dependencies.iter().map(|d| d.0).collect::<Vec<_>>()),
    );
    entry.insert(
        "estimatedCost".to_string(),
        json!(node.estimated_cost.unwrap_or(0.0)),
    );
    entry.insert(
        "estimatedNrItems".to_string(),
        json!(node.estimated_nr_items.unwrap_or(0)),
    );

    match &node.kind {
        NodeKind::Singleton | NodeKind::NoResults | NodeKind::Remote => {}
        NodeKind::EnumerateCollection {
            collection,
            out_var,
            random,
        } => {
            entry.insert("collection".to_string(), json!(collection));
            entry.insert(
                "outVariable".to_string(),
                variable_json(registry, *out_var)?,
            );
            entry.insert("random".to_string(), json!(random));
        }
        NodeKind::EnumerateList { in_var, out_var } => {
            entry.insert("inVariable".to_string(), variable_json(registry, *in_var)?);
            entry.insert(
                "outVariable".to_string(),
                variable_json(registry, *out_var)?,
            );
        }
        NodeKind::IndexRange {
            collection,
            index_id,
            out_var,
            ranges,
            reverse,
        } => {
            entry.insert("collection".to_string(), json!(collection));
            entry.insert("index".to_string(), json!({"id": index_id}));
            entry.insert(
                "outVariable".to_string(),
                variable_json(registry, *out_var)?,
            );
            entry.insert(
                "ranges".to_string(),
                serde_json::to_value(ranges).map_err(|e| PlannerError::internal(e.to_string()))?,
            );
            entry.insert("reverse".to_string(), json!(reverse));
        }
        NodeKind::Filter { in_var } => {
            entry.insert("inVariable".to_string(), variable_json(registry, *in_var)?);
        }
        NodeKind::Calculation {
            expression,
            out_var,
            condition_var,
        } => {
            entry.insert("expression".to_string(), expr_json(expression)?);
            entry.insert(
                "outVariable".to_string(),
                variable_json(registry, *out_var)?,
            );
            entry.insert(
                "conditionVariable".to_string(),
                optional_variable_json(registry, *condition_var)?,
            );
        }
        NodeKind::Subquery {
            subquery_root,
            out_var,
        } => {
            entry.insert(
                "subquery".to_string(),
                json!({"nodes": chain_to_json(plan, registry, *subquery_root)?}),
            );
            entry.insert(
                "outVariable".to_string(),
                variable_json(registry, *out_var)?,
            );
        }
        NodeKind::Sort { elements, stable } => {
            entry.insert(
                "elements".to_string(),
                sort_elements_json(registry, elements)?,
            );
            entry.insert("stable".to_string(), json!(stable));
        }
        NodeKind::Collect {
            group_pairs,
            expression_var,
            out_var,
            keep_vars,
            count_only,
        } => {
            let groups: Vec<Value> = group_pairs
                .iter()
                .map(|(out, input)| {
                    Ok(json!({
                        "outVariable": variable_json(registry, *out)?,
                        "inVariable": variable_json(registry, *input)?,
                    }))
                })
                .collect::<PlannerResult<_>>()?;
            entry.insert("groups".to_string(), Value::Array(groups));
            entry.insert(
                "expressionVariable".to_string(),
                optional_variable_json(registry, *expression_var)?,
            );
            entry.insert(
                "outVariable".to_string(),
                optional_variable_json(registry, *out_var)?,
            );
            let keeps: Vec<Value> = keep_vars
                .iter()
                .map(|v| variable_json(registry, *v))
                .collect::<PlannerResult<_>>()?;
            entry.insert("keepVariables".to_string(), Value::Array(keeps));
            entry.insert("countOnly".to_string(), json!(count_only));
        }
        NodeKind::Limit {
            offset,
            limit,
            full_count,
        } => {
            entry.insert("offset".to_string(), json!(offset));
            entry.insert("limit".to_string(), json!(limit));
            entry.insert("fullCount".to_string(), json!(full_count));
        }
        NodeKind::Return { in_var } => {
            entry.insert("inVariable".to_string(), variable_json(registry, *in_var)?);
        }
        NodeKind::Insert {
            collection,
            options,
            in_var,
            out_var,
        }
        | NodeKind::Remove {
            collection,
            options,
            in_var,
            out_var,
        } => {
            entry.insert("collection".to_string(), json!(collection));
            entry.insert("options".to_string(), options_json(options));
            entry.insert("inVariable".to_string(), variable_json(registry, *in_var)?);
            entry.insert(
                "outVariable".to_string(),
                optional_variable_json(registry, *out_var)?,
            );
        }
        NodeKind::Update {
            collection,
            options,
            in_doc_var,
            in_key_var,
            out_var,
        }
        | NodeKind::Replace {
            collection,
            options,
            in_doc_var,
            in_key_var,
            out_var,
        } => {
            entry.insert("collection".to_string(), json!(collection));
            entry.insert("options".to_string(), options_json(options));
            entry.insert(
                "inDocVariable".to_string(),
                variable_json(registry, *in_doc_var)?,
            );
            entry.insert(
                "inKeyVariable".to_string(),
                optional_variable_json(registry, *in_key_var)?,
            );
            entry.insert(
                "outVariable".to_string(),
                optional_variable_json(registry, *out_var)?,
            );
        }
        NodeKind::Scatter { collection } | NodeKind::Distribute { collection } => {
            entry.insert("collection".to_string(), json!(collection));
        }
        NodeKind::Gather { elements } => {
            entry.insert(
                "elements".to_string(),
                sort_elements_json(registry, elements)?,
            );
        }
    }
    Ok(Value::Object(entry))
}

// ----------------------------------------------------------------------
// Deserialization
// ----------------------------------------------------------------------

/// Rebuild a plan from its explain document, validating collections and
/// indexes against the local catalog and registering all variables.
pub fn from_json(
    document: &Value,
    catalog: &Catalog,
    registry: &mut VariableRegistry,
) -> PlannerResult<ExecutionPlan> {
    let object = document
        .as_object()
        .ok_or_else(|| PlannerError::bad_parameter("plan document must be an object"))?;

    for variable in array_field(object, "variables")? {
        let var = variable
            .as_object()
            .ok_or_else(|| PlannerError::bad_parameter("variable entry must be an object"))?;
        let id = u64_field(var, "id")?;
        let name = string_field(var, "name")?;
        // Planner temporaries carry their id-derived name; everything else
        // was user-defined
        let user_defined = !name.starts_with('$');
        registry.insert_existing(Variable {
            id: VariableId(id),
            name,
            user_defined,
        });
    }

    let mut plan = ExecutionPlan::new();
    let root = restore_chain(array_field(object, "nodes")?, &mut plan, catalog)?;
    plan.set_root(root);

    for rule in array_field(object, "rules")? {
        let name = rule
            .as_str()
            .ok_or_else(|| PlannerError::bad_parameter("rule entry must be a string"))?;
        plan.applied_rules.push(name.to_string());
    }
    for collection in array_field(object, "collections")? {
        let entry = collection
            .as_object()
            .ok_or_else(|| PlannerError::bad_parameter("collection entry must be an object"))?;
        let name = string_field(entry, "name")?;
        catalog.require(&name)?;
        let access = match string_field(entry, "type")?.as_str() {
            "write" => CollectionAccess::Write,
            _ => CollectionAccess::Read,
        };
        plan.note_collection_access(&name, access);
    }
    plan.check_invariants()?;
    Ok(plan)
}

/// Restore one chain of node entries; returns the chain's root (the last
/// entry).
fn restore_chain(
    entries: &[Value],
    plan: &mut ExecutionPlan,
    catalog: &Catalog,
) -> PlannerResult<NodeId> {
    let mut last = None;
    for entry in entries {
        let object = entry
            .as_object()
            .ok_or_else(|| PlannerError::bad_parameter("node entry must be an object"))?;
        let id = NodeId(u64_field(object, "id")?);
        let kind = restore_kind(object, plan, catalog)?;
        plan.add_node_with_id(id, kind)?;
        {
            let node = plan.node_mut(id);
            node.estimated_cost = object.get("estimatedCost").and_then(Value::as_f64);
            node.estimated_nr_items = object
                .get("estimatedNrItems")
                .and_then(Value::as_u64)
                .map(|n| n as usize);
        }
        for dependency in array_field(object, "dependencies")? {
            let dep = dependency
                .as_u64()
                .ok_or_else(|| PlannerError::bad_parameter("dependency must be a node id"))?;
            plan.add_dependency(id, NodeId(dep));
        }
        last = Some(id);
    }
    last.ok_or_else(|| PlannerError::bad_parameter("plan has no nodes"))
}

fn restore_kind(
    object: &Map<String, Value>,
    plan: &mut ExecutionPlan,
    catalog: &Catalog,
) -> PlannerResult<NodeKind> {
    let type_name = string_field(object, "type")?;
    let kind = match type_name.as_str() {
        "SingletonNode" => NodeKind::Singleton,
        "NoResultsNode" => NodeKind::NoResults,
        "RemoteNode" => NodeKind::Remote,
        "EnumerateCollectionNode" => {
            let collection = collection_field(object, catalog)?;
            NodeKind::EnumerateCollection {
                collection,
                out_var: variable_field(object, "outVariable")?,
                random: bool_field(object, "random")?,
            }
        }
        "EnumerateListNode" => NodeKind::EnumerateList {
            in_var: variable_field(object, "inVariable")?,
            out_var: variable_field(object, "outVariable")?,
        },
        "IndexRangeNode" => {
            let collection = collection_field(object, catalog)?;
            let index = object
                .get("index")
                .and_then(Value::as_object)
                .ok_or_else(|| PlannerError::bad_parameter("index descriptor missing"))?;
            let index_id = string_field(index, "id")?;
            catalog.require_index(&collection, &index_id)?;
            let ranges: RangeSet = serde_json::from_value(
                object
                    .get("ranges")
                    .cloned()
                    .ok_or_else(|| PlannerError::bad_parameter("ranges missing"))?,
            )
            .map_err(|e| PlannerError::bad_parameter(format!("malformed ranges: {e}")))?;
            NodeKind::IndexRange {
                collection,
                index_id,
                out_var: variable_field(object, "outVariable")?,
                ranges,
                reverse: bool_field(object, "reverse")?,
            }
        }
        "FilterNode" => NodeKind::Filter {
            in_var: variable_field(object, "inVariable")?,
        },
        "CalculationNode" => NodeKind::Calculation {
            expression: expr_field(object, "expression")?,
            out_var: variable_field(object, "outVariable")?,
            condition_var: optional_variable_field(object, "conditionVariable")?,
        },
        "SubqueryNode" => {
            let nested = object
                .get("subquery")
                .and_then(Value::as_object)
                .ok_or_else(|| PlannerError::bad_parameter("subquery body missing"))?;
            let subquery_root = restore_chain(array_field(nested, "nodes")?, plan, catalog)?;
            NodeKind::Subquery {
                subquery_root,
                out_var: variable_field(object, "outVariable")?,
            }
        }
        "SortNode" => NodeKind::Sort {
            elements: sort_elements_field(object)?,
            stable: bool_field(object, "stable")?,
        },
        "CollectNode" => {
            let mut group_pairs = Vec::new();
            for group in array_field(object, "groups")? {
                let entry = group
                    .as_object()
                    .ok_or_else(|| PlannerError::bad_parameter("group entry must be an object"))?;
                group_pairs.push((
                    variable_field(entry, "outVariable")?,
                    variable_field(entry, "inVariable")?,
                ));
            }
            let mut keep_vars = Vec::new();
            for keep in array_field(object, "keepVariables")? {
                keep_vars.push(variable_value(keep)?);
            }
            NodeKind::Collect {
                group_pairs,
                expression_var: optional_variable_field(object, "expressionVariable")?,
                out_var: optional_variable_field(object, "outVariable")?,
                keep_vars,
                count_only: bool_field(object, "countOnly")?,
            }
        }
        "LimitNode" => NodeKind::Limit {
            offset: u64_field(object, "offset")? as usize,
            limit: u64_field(object, "limit")? as usize,
            full_count: bool_field(object, "fullCount")?,
        },
        "ReturnNode" => NodeKind::Return {
            in_var: variable_field(object, "inVariable")?,
        },
        "InsertNode" | "RemoveNode" => {
            let collection = collection_field(object, catalog)?;
            let options = options_field(object)?;
            let in_var = variable_field(object, "inVariable")?;
            let out_var = optional_variable_field(object, "outVariable")?;
            if type_name == "InsertNode" {
                NodeKind::Insert {
                    collection,
                    options,
                    in_var,
                    out_var,
                }
            } else {
                NodeKind::Remove {
                    collection,
                    options,
                    in_var,
                    out_var,
                }
            }
        }
        "UpdateNode" | "ReplaceNode" => {
            let collection = collection_field(object, catalog)?;
            let options = options_field(object)?;
            let in_doc_var = variable_field(object, "inDocVariable")?;
            let in_key_var = optional_variable_field(object, "inKeyVariable")?;
            let out_var = optional_variable_field(object, "outVariable")?;
            if type_name == "UpdateNode" {
                NodeKind::Update {
                    collection,
                    options,
                    in_doc_var,
                    in_key_var,
                    out_var,
                }
            } else {
                NodeKind::Replace {
                    collection,
                    options,
                    in_doc_var,
                    in_key_var,
                    out_var,
                }
            }
        }
        "ScatterNode" => NodeKind::Scatter {
            collection: collection_field(object, catalog)?,
        },
        "DistributeNode" => NodeKind::Distribute {
            collection: collection_field(object, catalog)?,
        },
        "GatherNode" => NodeKind::Gather {
            elements: sort_elements_field(object)?,
        },
        other => {
            return Err(PlannerError::UnsupportedNodeType {
                type_name: other.to_string(),
            })
        }
    };
    Ok(kind)
}

// ----------------------------------------------------------------------
// Field helpers
// ----------------------------------------------------------------------

fn array_field<'a>(object: &'a Map<String, Value>, key: &str) -> PlannerResult<&'a [Value]> {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| PlannerError::bad_parameter(format!("missing array field '{key}'")))
}

fn string_field(object: &Map<String, Value>, key: &str) -> PlannerResult<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PlannerError::bad_parameter(format!("missing string field '{key}'")))
}

fn u64_field(object: &Map<String, Value>, key: &str) -> PlannerResult<u64> {
    object
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| PlannerError::bad_parameter(format!("missing numeric field '{key}'")))
}

fn bool_field(object: &Map<String, Value>, key: &str) -> PlannerResult<bool> {
    object
        .get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| PlannerError::bad_parameter(format!("missing boolean field '{key}'")))
}

fn collection_field(object: &Map<String, Value>, catalog: &Catalog) -> PlannerResult<String> {
    let name = string_field(object, "collection")?;
    catalog.require(&name)?;
    Ok(name)
}

fn variable_value(value: &Value) -> PlannerResult<VariableId> {
    value
        .as_object()
        .and_then(|v| v.get("id"))
        .and_then(Value::as_u64)
        .map(VariableId)
        .ok_or_else(|| PlannerError::bad_parameter("malformed variable reference"))
}

fn variable_field(object: &Map<String, Value>, key: &str) -> PlannerResult<VariableId> {
    variable_value(
        object
            .get(key)
            .ok_or_else(|| PlannerError::bad_parameter(format!("missing variable '{key}'")))?,
    )
}

fn optional_variable_field(
    object: &Map<String, Value>,
    key: &str,
) -> PlannerResult<Option<VariableId>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => variable_value(value).map(Some),
    }
}

fn expr_field(object: &Map<String, Value>, key: &str) -> PlannerResult<Expr> {
    let value = object
        .get(key)
        .ok_or_else(|| PlannerError::bad_parameter(format!("missing expression '{key}'")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| PlannerError::bad_parameter(format!("malformed expression: {e}")))
}

fn options_field(object: &Map<String, Value>) -> PlannerResult<ModificationOptions> {
    let value = object
        .get("options")
        .ok_or_else(|| PlannerError::bad_parameter("missing modification options"))?;
    serde_json::from_value(value.clone())
        .map_err(|e| PlannerError::bad_parameter(format!("malformed options: {e}")))
}

fn sort_elements_field(object: &Map<String, Value>) -> PlannerResult<Vec<SortEntry>> {
    let mut elements = Vec::new();
    for element in array_field(object, "elements")? {
        let entry = element
            .as_object()
            .ok_or_else(|| PlannerError::bad_parameter("sort element must be an object"))?;
        elements.push(SortEntry {
            variable: variable_field(entry, "inVariable")?,
            ascending: bool_field(entry, "ascending")?,
        });
    }
    Ok(elements)
}
