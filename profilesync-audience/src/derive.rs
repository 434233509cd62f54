use crate::spec::{AudienceSpec, Rule, RuleToken};
use profilesync_model::{BooleanOperator, FieldRegistry};

/// Builds one spec per audience named by a filtered field trigger.
///
/// Each trigger contributes `storage_key <comparison> filter`; a trigger's
/// operator joins its comparison to the previous one. Audiences are
/// returned in order of first mention.
#[must_use]
pub fn specs_from_registry(registry: &FieldRegistry) -> Vec<AudienceSpec> {
    let mut specs: Vec<(AudienceSpec, Vec<BooleanOperator>)> = Vec::new();

    for field in registry.fields() {
        for trigger in &field.audiences {
            let Some(filter) = &trigger.filter else {
                continue;
            };
            let idx = match specs.iter().position(|(s, _)| s.name == trigger.audience) {
                Some(i) => i,
                None => {
                    let mut spec = AudienceSpec::new(trigger.audience.clone());
                    spec.boolean_operator = trigger.operator;
                    specs.push((spec, Vec::new()));
                    specs.len() - 1
                }
            };
            let (spec, connectors) = &mut specs[idx];
            if !spec.rules.is_empty() {
                spec.rules.push(RuleToken::connector(trigger.operator));
                connectors.push(trigger.operator);
            }
            spec.rules.push(RuleToken::Comparison(Rule::new(
                field.storage_key.clone(),
                trigger.comparison,
                filter.clone(),
            )));
            if spec.description.is_none() {
                spec.description.clone_from(&trigger.description);
            }
        }
    }

    specs
        .into_iter()
        .map(|(mut spec, connectors)| {
            if !connectors.is_empty() {
                spec.boolean_operator = if connectors.iter().all(|op| *op == BooleanOperator::Or) {
                    BooleanOperator::Or
                } else {
                    BooleanOperator::And
                };
            }
            spec
        })
        .collect()
}
