//! Choice-type ("`value[x]`") field map.
//!
//! FHIR encodes polymorphic elements by suffixing the field name with the
//! concrete type: `Observation.value[x]` becomes `valueQuantity`,
//! `valueCodeableConcept`, and so on. The map below lists, per choice field,
//! the concrete types it may take in R4. Keys are the bare field names; the
//! JSON key for a concrete choice is `field + TitleCase(type)`.
//!
//! The `value` entry carries the open type list (the one Extension.value[x]
//! uses); resource-specific `value[x]` elements are subsets of it, so a single
//! context-free entry is sufficient for rewriting `ofType()` / `is` / `as`.

use phf::phf_map;

/// The open type list: every type allowed for Extension.value[x] in R4.
static OPEN_TYPES: &[&str] = &[
    "base64Binary",
    "boolean",
    "canonical",
    "code",
    "date",
    "dateTime",
    "decimal",
    "id",
    "instant",
    "integer",
    "markdown",
    "oid",
    "positiveInt",
    "string",
    "time",
    "unsignedInt",
    "uri",
    "url",
    "uuid",
    "Address",
    "Age",
    "Annotation",
    "Attachment",
    "CodeableConcept",
    "Coding",
    "ContactPoint",
    "Count",
    "Distance",
    "Duration",
    "HumanName",
    "Identifier",
    "Money",
    "Period",
    "Quantity",
    "Range",
    "Ratio",
    "Reference",
    "SampledData",
    "Signature",
    "Timing",
    "ContactDetail",
    "Contributor",
    "DataRequirement",
    "Expression",
    "ParameterDefinition",
    "RelatedArtifact",
    "TriggerDefinition",
    "UsageContext",
    "Dosage",
    "Meta",
];

/// Choice field name -> concrete R4 types, in declaration order.
static CHOICE_TYPES: phf::Map<&'static str, &'static [&'static str]> = phf_map! {
    "value" => OPEN_TYPES,
    "onset" => &["dateTime", "Age", "Period", "Range", "string"],
    "abatement" => &["dateTime", "Age", "Period", "Range", "string"],
    "effective" => &["dateTime", "Period", "Timing", "instant"],
    "deceased" => &["boolean", "dateTime"],
    "multipleBirth" => &["boolean", "integer"],
    "medication" => &["CodeableConcept", "Reference"],
    "dose" => &["Range", "Quantity"],
    "rate" => &["Ratio", "Range", "Quantity"],
    "asNeeded" => &["boolean", "CodeableConcept"],
    "occurrence" => &["dateTime", "Period", "Timing", "string"],
    "performed" => &["dateTime", "Period", "string", "Age", "Range"],
    "scheduled" => &["Timing", "Period", "string"],
    "serviced" => &["date", "Period"],
    "timing" => &["Timing", "Reference", "date", "dateTime"],
    "product" => &["CodeableConcept", "Reference"],
    "fastingStatus" => &["CodeableConcept", "Duration"],
    "collected" => &["dateTime", "Period"],
    "time" => &["dateTime", "Period"],
    "created" => &["dateTime", "Period"],
    "allowed" => &["unsignedInt", "string", "Money"],
    "used" => &["unsignedInt", "string", "Money"],
    "diagnosis" => &["CodeableConcept", "Reference"],
    "procedure" => &["CodeableConcept", "Reference"],
    "location" => &["Address", "Reference"],
    "chargeItem" => &["CodeableConcept", "Reference"],
    "definition" => &["Reference", "canonical", "CodeableConcept", "Expression", "DataRequirement", "TriggerDefinition"],
    "born" => &["Period", "date", "string"],
    "age" => &["Age", "Range", "string"],
    "due" => &["date", "Duration"],
    "detail" => &["Quantity", "Range", "CodeableConcept", "string", "boolean", "integer", "Ratio"],
    "identified" => &["dateTime", "Period"],
    "item" => &["CodeableConcept", "Reference"],
    "content" => &["string", "Attachment", "Reference"],
    "source" => &["Attachment", "Reference"],
    "answer" => &["boolean", "decimal", "integer", "date", "dateTime", "time", "string", "uri", "Attachment", "Coding", "Quantity", "Reference"],
    "module" => &["uri", "canonical", "CodeableConcept"],
    "subject" => &["CodeableConcept", "Reference"],
    "entity" => &["Identifier", "Reference"],
    "instantiates" => &["canonical", "uri"],
    "legallyBinding" => &["Attachment", "Reference"],
    "topic" => &["CodeableConcept", "Reference"],
    "event" => &["Coding", "uri"],
    "probability" => &["decimal", "Range"],
    "when" => &["Period", "Range"],
    "start" => &["date", "CodeableConcept"],
    "participantEffective" => &["dateTime", "Period", "Duration", "Timing"],
    "studyEffective" => &["dateTime", "Period", "Duration", "Timing"],
};

/// Whether `field` is a known choice-type base name.
pub fn is_choice_field(field: &str) -> bool {
    CHOICE_TYPES.contains_key(field)
}

/// Concrete types a choice field may take, in declaration order.
pub fn choice_types_for(field: &str) -> Option<&'static [&'static str]> {
    CHOICE_TYPES.get(field).copied()
}

/// JSON object key for a concrete choice: `("value", "Quantity")` ->
/// `"valueQuantity"`, `("value", "dateTime")` -> `"valueDateTime"`.
pub fn choice_field_key(field: &str, type_name: &str) -> String {
    let mut key = String::with_capacity(field.len() + type_name.len());
    key.push_str(field);
    let mut chars = type_name.chars();
    if let Some(first) = chars.next() {
        key.extend(first.to_uppercase());
        key.push_str(chars.as_str());
    }
    key
}

/// Resolve a concrete JSON key back to its `(base_field, type)` pair, e.g.
/// `"valueQuantity"` -> `("value", "Quantity")`. Returns `None` for keys that
/// are not a known choice expansion.
pub fn parse_concrete_key(key: &str) -> Option<(&'static str, &'static str)> {
    for (field, types) in CHOICE_TYPES.entries() {
        if let Some(rest) = key.strip_prefix(field) {
            for ty in types.iter() {
                if choice_field_key("", ty) == rest {
                    return Some((field, ty));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_type_list_is_complete() {
        assert_eq!(OPEN_TYPES.len(), 50);
        assert!(OPEN_TYPES.contains(&"Quantity"));
        assert!(OPEN_TYPES.contains(&"base64Binary"));
    }

    #[test]
    fn covers_r4_conformance_mappings() {
        let total: usize = CHOICE_TYPES.values().map(|types| types.len()).sum();
        assert!(total >= 187, "choice map has {total} pairs");
    }

    #[test]
    fn concrete_keys() {
        assert_eq!(choice_field_key("value", "Quantity"), "valueQuantity");
        assert_eq!(choice_field_key("value", "dateTime"), "valueDateTime");
        assert_eq!(choice_field_key("deceased", "boolean"), "deceasedBoolean");
        assert_eq!(
            choice_field_key("value", "base64Binary"),
            "valueBase64Binary"
        );
    }

    #[test]
    fn parse_concrete_round_trips() {
        assert_eq!(
            parse_concrete_key("valueQuantity"),
            Some(("value", "Quantity"))
        );
        assert_eq!(
            parse_concrete_key("onsetDateTime"),
            Some(("onset", "dateTime"))
        );
        assert_eq!(parse_concrete_key("family"), None);
    }
}
