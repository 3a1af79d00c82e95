//! Element table: declared type and cardinality per `Type.element` path.
//!
//! The table covers the resources and datatypes exercised by the SQL-on-FHIR
//! conformance corpus. It is deliberately not a full R4 model: a miss returns
//! `None` and callers treat the population as unknown rather than rejecting.

use phf::phf_map;

/// Whether an element holds at most one value or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Scalar,
    Collection,
    Unknown,
}

/// Declared type and cardinality of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementInfo {
    pub fhir_type: &'static str,
    pub collection: bool,
}

impl ElementInfo {
    pub fn cardinality(&self) -> Cardinality {
        if self.collection {
            Cardinality::Collection
        } else {
            Cardinality::Scalar
        }
    }
}

const fn scalar(fhir_type: &'static str) -> ElementInfo {
    ElementInfo {
        fhir_type,
        collection: false,
    }
}

const fn many(fhir_type: &'static str) -> ElementInfo {
    ElementInfo {
        fhir_type,
        collection: true,
    }
}

static ELEMENTS: phf::Map<&'static str, ElementInfo> = phf_map! {
    // Patient
    "Patient.identifier" => many("Identifier"),
    "Patient.active" => scalar("boolean"),
    "Patient.name" => many("HumanName"),
    "Patient.telecom" => many("ContactPoint"),
    "Patient.gender" => scalar("code"),
    "Patient.birthDate" => scalar("date"),
    "Patient.address" => many("Address"),
    "Patient.maritalStatus" => scalar("CodeableConcept"),
    "Patient.photo" => many("Attachment"),
    "Patient.contact" => many("BackboneElement"),
    "Patient.communication" => many("BackboneElement"),
    "Patient.generalPractitioner" => many("Reference"),
    "Patient.managingOrganization" => scalar("Reference"),
    "Patient.link" => many("BackboneElement"),

    // Observation
    "Observation.identifier" => many("Identifier"),
    "Observation.basedOn" => many("Reference"),
    "Observation.partOf" => many("Reference"),
    "Observation.status" => scalar("code"),
    "Observation.category" => many("CodeableConcept"),
    "Observation.code" => scalar("CodeableConcept"),
    "Observation.subject" => scalar("Reference"),
    "Observation.focus" => many("Reference"),
    "Observation.encounter" => scalar("Reference"),
    "Observation.issued" => scalar("instant"),
    "Observation.performer" => many("Reference"),
    "Observation.dataAbsentReason" => scalar("CodeableConcept"),
    "Observation.interpretation" => many("CodeableConcept"),
    "Observation.note" => many("Annotation"),
    "Observation.bodySite" => scalar("CodeableConcept"),
    "Observation.method" => scalar("CodeableConcept"),
    "Observation.specimen" => scalar("Reference"),
    "Observation.device" => scalar("Reference"),
    "Observation.referenceRange" => many("BackboneElement"),
    "Observation.hasMember" => many("Reference"),
    "Observation.derivedFrom" => many("Reference"),
    "Observation.component" => many("BackboneElement"),

    // Condition
    "Condition.identifier" => many("Identifier"),
    "Condition.clinicalStatus" => scalar("CodeableConcept"),
    "Condition.verificationStatus" => scalar("CodeableConcept"),
    "Condition.category" => many("CodeableConcept"),
    "Condition.severity" => scalar("CodeableConcept"),
    "Condition.code" => scalar("CodeableConcept"),
    "Condition.bodySite" => many("CodeableConcept"),
    "Condition.subject" => scalar("Reference"),
    "Condition.encounter" => scalar("Reference"),
    "Condition.recordedDate" => scalar("dateTime"),
    "Condition.recorder" => scalar("Reference"),
    "Condition.asserter" => scalar("Reference"),
    "Condition.stage" => many("BackboneElement"),
    "Condition.evidence" => many("BackboneElement"),
    "Condition.note" => many("Annotation"),

    // Encounter
    "Encounter.identifier" => many("Identifier"),
    "Encounter.status" => scalar("code"),
    "Encounter.class" => scalar("Coding"),
    "Encounter.type" => many("CodeableConcept"),
    "Encounter.serviceType" => scalar("CodeableConcept"),
    "Encounter.priority" => scalar("CodeableConcept"),
    "Encounter.subject" => scalar("Reference"),
    "Encounter.episodeOfCare" => many("Reference"),
    "Encounter.basedOn" => many("Reference"),
    "Encounter.participant" => many("BackboneElement"),
    "Encounter.appointment" => many("Reference"),
    "Encounter.period" => scalar("Period"),
    "Encounter.length" => scalar("Duration"),
    "Encounter.reasonCode" => many("CodeableConcept"),
    "Encounter.reasonReference" => many("Reference"),
    "Encounter.diagnosis" => many("BackboneElement"),
    "Encounter.location" => many("BackboneElement"),
    "Encounter.serviceProvider" => scalar("Reference"),
    "Encounter.partOf" => scalar("Reference"),

    // Immunization
    "Immunization.identifier" => many("Identifier"),
    "Immunization.status" => scalar("code"),
    "Immunization.statusReason" => scalar("CodeableConcept"),
    "Immunization.vaccineCode" => scalar("CodeableConcept"),
    "Immunization.patient" => scalar("Reference"),
    "Immunization.encounter" => scalar("Reference"),
    "Immunization.recorded" => scalar("dateTime"),
    "Immunization.primarySource" => scalar("boolean"),
    "Immunization.lotNumber" => scalar("string"),
    "Immunization.expirationDate" => scalar("date"),
    "Immunization.site" => scalar("CodeableConcept"),
    "Immunization.route" => scalar("CodeableConcept"),
    "Immunization.doseQuantity" => scalar("Quantity"),
    "Immunization.performer" => many("BackboneElement"),
    "Immunization.note" => many("Annotation"),
    "Immunization.reasonCode" => many("CodeableConcept"),
    "Immunization.reasonReference" => many("Reference"),
    "Immunization.protocolApplied" => many("BackboneElement"),

    // MedicationRequest
    "MedicationRequest.identifier" => many("Identifier"),
    "MedicationRequest.status" => scalar("code"),
    "MedicationRequest.statusReason" => scalar("CodeableConcept"),
    "MedicationRequest.intent" => scalar("code"),
    "MedicationRequest.category" => many("CodeableConcept"),
    "MedicationRequest.priority" => scalar("code"),
    "MedicationRequest.subject" => scalar("Reference"),
    "MedicationRequest.encounter" => scalar("Reference"),
    "MedicationRequest.authoredOn" => scalar("dateTime"),
    "MedicationRequest.requester" => scalar("Reference"),
    "MedicationRequest.reasonCode" => many("CodeableConcept"),
    "MedicationRequest.reasonReference" => many("Reference"),
    "MedicationRequest.note" => many("Annotation"),
    "MedicationRequest.dosageInstruction" => many("Dosage"),
    "MedicationRequest.dispenseRequest" => scalar("BackboneElement"),

    // AllergyIntolerance
    "AllergyIntolerance.identifier" => many("Identifier"),
    "AllergyIntolerance.clinicalStatus" => scalar("CodeableConcept"),
    "AllergyIntolerance.verificationStatus" => scalar("CodeableConcept"),
    "AllergyIntolerance.type" => scalar("code"),
    "AllergyIntolerance.category" => many("code"),
    "AllergyIntolerance.criticality" => scalar("code"),
    "AllergyIntolerance.code" => scalar("CodeableConcept"),
    "AllergyIntolerance.patient" => scalar("Reference"),
    "AllergyIntolerance.encounter" => scalar("Reference"),
    "AllergyIntolerance.recordedDate" => scalar("dateTime"),
    "AllergyIntolerance.reaction" => many("BackboneElement"),

    // Practitioner
    "Practitioner.identifier" => many("Identifier"),
    "Practitioner.active" => scalar("boolean"),
    "Practitioner.name" => many("HumanName"),
    "Practitioner.telecom" => many("ContactPoint"),
    "Practitioner.address" => many("Address"),
    "Practitioner.gender" => scalar("code"),
    "Practitioner.birthDate" => scalar("date"),
    "Practitioner.qualification" => many("BackboneElement"),

    // HumanName
    "HumanName.use" => scalar("code"),
    "HumanName.text" => scalar("string"),
    "HumanName.family" => scalar("string"),
    "HumanName.given" => many("string"),
    "HumanName.prefix" => many("string"),
    "HumanName.suffix" => many("string"),
    "HumanName.period" => scalar("Period"),

    // ContactPoint
    "ContactPoint.system" => scalar("code"),
    "ContactPoint.value" => scalar("string"),
    "ContactPoint.use" => scalar("code"),
    "ContactPoint.rank" => scalar("positiveInt"),
    "ContactPoint.period" => scalar("Period"),

    // Address
    "Address.use" => scalar("code"),
    "Address.type" => scalar("code"),
    "Address.text" => scalar("string"),
    "Address.line" => many("string"),
    "Address.city" => scalar("string"),
    "Address.district" => scalar("string"),
    "Address.state" => scalar("string"),
    "Address.postalCode" => scalar("string"),
    "Address.country" => scalar("string"),
    "Address.period" => scalar("Period"),

    // Identifier
    "Identifier.use" => scalar("code"),
    "Identifier.type" => scalar("CodeableConcept"),
    "Identifier.system" => scalar("uri"),
    "Identifier.value" => scalar("string"),
    "Identifier.period" => scalar("Period"),
    "Identifier.assigner" => scalar("Reference"),

    // CodeableConcept / Coding
    "CodeableConcept.coding" => many("Coding"),
    "CodeableConcept.text" => scalar("string"),
    "Coding.system" => scalar("uri"),
    "Coding.version" => scalar("string"),
    "Coding.code" => scalar("code"),
    "Coding.display" => scalar("string"),
    "Coding.userSelected" => scalar("boolean"),

    // Quantity / Period / Range / Ratio
    "Quantity.value" => scalar("decimal"),
    "Quantity.comparator" => scalar("code"),
    "Quantity.unit" => scalar("string"),
    "Quantity.system" => scalar("uri"),
    "Quantity.code" => scalar("code"),
    "Period.start" => scalar("dateTime"),
    "Period.end" => scalar("dateTime"),
    "Range.low" => scalar("Quantity"),
    "Range.high" => scalar("Quantity"),
    "Ratio.numerator" => scalar("Quantity"),
    "Ratio.denominator" => scalar("Quantity"),

    // Reference
    "Reference.reference" => scalar("string"),
    "Reference.type" => scalar("uri"),
    "Reference.identifier" => scalar("Identifier"),
    "Reference.display" => scalar("string"),

    // Extension
    "Extension.url" => scalar("uri"),

    // Annotation
    "Annotation.time" => scalar("dateTime"),
    "Annotation.text" => scalar("markdown"),

    // Dosage
    "Dosage.sequence" => scalar("integer"),
    "Dosage.text" => scalar("string"),
    "Dosage.additionalInstruction" => many("CodeableConcept"),
    "Dosage.patientInstruction" => scalar("string"),
    "Dosage.timing" => scalar("Timing"),
    "Dosage.route" => scalar("CodeableConcept"),
    "Dosage.doseAndRate" => many("Element"),

    // Attachment
    "Attachment.contentType" => scalar("code"),
    "Attachment.language" => scalar("code"),
    "Attachment.data" => scalar("base64Binary"),
    "Attachment.url" => scalar("url"),
    "Attachment.size" => scalar("unsignedInt"),
    "Attachment.hash" => scalar("base64Binary"),
    "Attachment.title" => scalar("string"),
    "Attachment.creation" => scalar("dateTime"),

    // Meta
    "Meta.versionId" => scalar("id"),
    "Meta.lastUpdated" => scalar("instant"),
    "Meta.source" => scalar("uri"),
    "Meta.profile" => many("canonical"),
    "Meta.security" => many("Coding"),
    "Meta.tag" => many("Coding"),
};

/// Look up the declared type and cardinality of `parent_type.field`.
///
/// Elements shared by every resource or element (`id`, `extension`, `meta`,
/// ...) resolve without a per-type entry. Concrete choice expansions such as
/// `valueQuantity` resolve through the choice map. A miss returns `None`.
pub fn element_info(parent_type: &str, field: &str) -> Option<ElementInfo> {
    match field {
        "id" => return Some(scalar("string")),
        "extension" | "modifierExtension" => return Some(many("Extension")),
        "meta" => return Some(scalar("Meta")),
        "implicitRules" => return Some(scalar("uri")),
        "language" => return Some(scalar("code")),
        "contained" => return Some(many("Resource")),
        _ => {}
    }

    let mut key = String::with_capacity(parent_type.len() + 1 + field.len());
    key.push_str(parent_type);
    key.push('.');
    key.push_str(field);
    if let Some(info) = ELEMENTS.get(key.as_str()) {
        return Some(*info);
    }

    // Concrete choice expansion: `valueQuantity` is a scalar Quantity
    // wherever it appears.
    if let Some((_, ty)) = crate::choice::parse_concrete_key(field) {
        return Some(scalar(ty));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_elements() {
        let name = element_info("Patient", "name").unwrap();
        assert_eq!(name.fhir_type, "HumanName");
        assert_eq!(name.cardinality(), Cardinality::Collection);

        let family = element_info("HumanName", "family").unwrap();
        assert_eq!(family.fhir_type, "string");
        assert_eq!(family.cardinality(), Cardinality::Scalar);
    }

    #[test]
    fn universal_elements() {
        assert_eq!(element_info("Patient", "id").unwrap().fhir_type, "string");
        assert!(element_info("Observation", "extension").unwrap().collection);
    }

    #[test]
    fn choice_expansion() {
        let v = element_info("Observation", "valueQuantity").unwrap();
        assert_eq!(v.fhir_type, "Quantity");
        assert!(!v.collection);
    }

    #[test]
    fn unknown_is_none() {
        assert!(element_info("Patient", "noSuchField").is_none());
        assert!(element_info("NoSuchType", "name").is_none());
    }
}
