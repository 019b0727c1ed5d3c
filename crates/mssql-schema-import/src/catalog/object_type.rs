//! Object type tags and the folder lookup tables of the export layout.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Kind of database object a script unit creates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectType {
    FileGroup,
    Security,
    DatabaseConfiguration,
    Schema,
    Sequence,
    PartitionFunction,
    PartitionScheme,
    UserDefinedType,
    XmlSchemaCollection,
    Table,
    ForeignKey,
    Index,
    Default,
    Rule,
    Function,
    StoredProcedure,
    Trigger,
    View,
    Assembly,
    Synonym,
    FullTextCatalog,
    ExternalData,
    SearchPropertyList,
    PlanGuide,
    SecurityPolicy,
    Data,
    /// Folder not in the layout table; carries the folder name without its prefix.
    Other(String),
}

/// Phase number of the programmability folder, the only one with sub-phases.
pub const PROGRAMMABILITY_PHASE: u8 = 14;

/// Phase assigned to folders that carry no numeric prefix.
pub const UNNUMBERED_PHASE: u8 = u8::MAX;

/// Top-level folders: (phase, folder name without prefix, type).
static PHASE_FOLDERS: &[(u8, &str, ObjectType)] = &[
    (0, "FileGroups", ObjectType::FileGroup),
    (1, "Security", ObjectType::Security),
    (2, "DatabaseConfiguration", ObjectType::DatabaseConfiguration),
    (3, "Schemas", ObjectType::Schema),
    (4, "Sequences", ObjectType::Sequence),
    (5, "PartitionFunctions", ObjectType::PartitionFunction),
    (6, "PartitionSchemes", ObjectType::PartitionScheme),
    (7, "Types", ObjectType::UserDefinedType),
    (8, "XmlSchemaCollections", ObjectType::XmlSchemaCollection),
    (9, "Tables_PrimaryKey", ObjectType::Table),
    (10, "Tables_ForeignKeys", ObjectType::ForeignKey),
    (11, "Indexes", ObjectType::Index),
    (12, "Defaults", ObjectType::Default),
    (13, "Rules", ObjectType::Rule),
    (15, "Synonyms", ObjectType::Synonym),
    (16, "FullTextSearch", ObjectType::FullTextCatalog),
    (17, "ExternalData", ObjectType::ExternalData),
    (18, "SearchPropertyLists", ObjectType::SearchPropertyList),
    (19, "PlanGuides", ObjectType::PlanGuide),
    (20, "SecurityPolicies", ObjectType::SecurityPolicy),
    (21, "Data", ObjectType::Data),
];

/// Folder name of the programmability phase.
pub const PROGRAMMABILITY_FOLDER: &str = "Programmability";

/// Programmability sub-folders: (sub-phase, folder name without prefix, type).
static PROGRAMMABILITY_FOLDERS: &[(u8, &str, ObjectType)] = &[
    (1, "Assemblies", ObjectType::Assembly),
    (2, "Functions", ObjectType::Function),
    (3, "Views", ObjectType::View),
    (4, "StoredProcedures", ObjectType::StoredProcedure),
    (5, "Triggers", ObjectType::Trigger),
];

/// Canonical tags, in declaration order.
static TAGS: &[(ObjectType, &str)] = &[
    (ObjectType::FileGroup, "FileGroup"),
    (ObjectType::Security, "Security"),
    (ObjectType::DatabaseConfiguration, "DatabaseConfiguration"),
    (ObjectType::Schema, "Schema"),
    (ObjectType::Sequence, "Sequence"),
    (ObjectType::PartitionFunction, "PartitionFunction"),
    (ObjectType::PartitionScheme, "PartitionScheme"),
    (ObjectType::UserDefinedType, "UserDefinedType"),
    (ObjectType::XmlSchemaCollection, "XmlSchemaCollection"),
    (ObjectType::Table, "Table"),
    (ObjectType::ForeignKey, "ForeignKey"),
    (ObjectType::Index, "Index"),
    (ObjectType::Default, "Default"),
    (ObjectType::Rule, "Rule"),
    (ObjectType::Function, "Function"),
    (ObjectType::StoredProcedure, "StoredProcedure"),
    (ObjectType::Trigger, "Trigger"),
    (ObjectType::View, "View"),
    (ObjectType::Assembly, "Assembly"),
    (ObjectType::Synonym, "Synonym"),
    (ObjectType::FullTextCatalog, "FullTextCatalog"),
    (ObjectType::ExternalData, "ExternalData"),
    (ObjectType::SearchPropertyList, "SearchPropertyList"),
    (ObjectType::PlanGuide, "PlanGuide"),
    (ObjectType::SecurityPolicy, "SecurityPolicy"),
    (ObjectType::Data, "Data"),
];

impl ObjectType {
    /// Canonical tag used in reports and configuration.
    pub fn as_str(&self) -> &str {
        if let ObjectType::Other(tag) = self {
            return tag;
        }
        TAGS.iter()
            .find(|(t, _)| t == self)
            .map(|(_, tag)| *tag)
            .unwrap_or("Unknown")
    }

    /// Parse a type tag as written by users.
    ///
    /// Accepts the canonical tag, its folder name, or the tag with a trailing
    /// `s` (`View`, `Views`, `Tables_PrimaryKey`, `Assemblies`), ignoring case.
    /// Anything else becomes [`ObjectType::Other`].
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim();
        let folder_match = PHASE_FOLDERS
            .iter()
            .chain(PROGRAMMABILITY_FOLDERS.iter())
            .find(|(_, folder, _)| folder.eq_ignore_ascii_case(tag))
            .map(|(_, _, t)| t.clone());
        if let Some(t) = folder_match {
            return t;
        }

        TAGS.iter()
            .find(|(_, canonical)| {
                canonical.eq_ignore_ascii_case(tag)
                    || tag
                        .strip_suffix(['s', 'S'])
                        .map(|singular| canonical.eq_ignore_ascii_case(singular))
                        .unwrap_or(false)
            })
            .map(|(t, _)| t.clone())
            .unwrap_or_else(|| ObjectType::Other(tag.to_string()))
    }

    /// Compare with a user-supplied tag, ignoring case.
    pub fn matches_tag(&self, tag: &str) -> bool {
        match (self, ObjectType::from_tag(tag)) {
            (ObjectType::Other(a), ObjectType::Other(b)) => a.eq_ignore_ascii_case(&b),
            (a, b) => *a == b,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ObjectType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ObjectType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(ObjectType::from_tag(&tag))
    }
}

/// Split a `NN_Name` folder into its numeric prefix and remaining name.
pub fn split_numeric_prefix(folder: &str) -> Option<(u8, &str)> {
    let digits = folder.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let number = folder[..digits].parse::<u8>().ok()?;
    let rest = folder[digits..].trim_start_matches(['_', '-', ' ']);
    Some((number, rest))
}

/// Resolve a top-level folder to (phase, type).
///
/// `None` type means the folder is the programmability phase and the type
/// comes from the sub-folder.
pub fn classify_top_folder(folder: &str) -> (u8, Option<ObjectType>) {
    match split_numeric_prefix(folder) {
        Some((phase, name)) => {
            if name.eq_ignore_ascii_case(PROGRAMMABILITY_FOLDER) {
                return (phase, None);
            }
            let object_type = PHASE_FOLDERS
                .iter()
                .find(|(_, folder, _)| folder.eq_ignore_ascii_case(name))
                .map(|(_, _, t)| t.clone())
                .unwrap_or_else(|| ObjectType::Other(name.to_string()));
            (phase, Some(object_type))
        }
        None => (UNNUMBERED_PHASE, Some(ObjectType::Other(folder.to_string()))),
    }
}

/// Resolve a programmability sub-folder to (sub-phase, type).
pub fn classify_programmability_folder(folder: &str) -> (u8, ObjectType) {
    match split_numeric_prefix(folder) {
        Some((sub_phase, name)) => {
            let object_type = PROGRAMMABILITY_FOLDERS
                .iter()
                .find(|(_, folder, _)| folder.eq_ignore_ascii_case(name))
                .map(|(_, _, t)| t.clone())
                .unwrap_or_else(|| ObjectType::Other(name.to_string()));
            (sub_phase, object_type)
        }
        None => (UNNUMBERED_PHASE, ObjectType::Other(folder.to_string())),
    }
}
