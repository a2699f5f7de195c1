//! Entity Schema Registry
//!
//! Static descriptors for every known entity type. Validator, transformer,
//! persister and document formatter all read the same descriptor, so they
//! stay entity-agnostic.

use crate::types::{DataType, EntityKind};

/// Target type of a canonical field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Coerced to `i64`
    Integer,
    /// Coerced to a trimmed string
    Text,
}

/// Single field of an entity schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name in raw and canonical records
    pub name: &'static str,
    /// Canonical type
    pub kind: FieldKind,
    /// Must be present and non-null
    pub required: bool,
    /// Label used in vector document text; unlabeled fields only go to metadata
    pub label: Option<&'static str>,
}

impl FieldSpec {
    const fn required(name: &'static str, kind: FieldKind, label: Option<&'static str>) -> Self {
        Self {
            name,
            kind,
            required: true,
            label,
        }
    }

    const fn optional(name: &'static str, kind: FieldKind, label: Option<&'static str>) -> Self {
        Self {
            name,
            kind,
            required: false,
            label,
        }
    }
}

/// Foreign key checked before relational inserts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    /// Referencing field
    pub field: &'static str,
    /// Referenced entity table
    pub references: EntityKind,
}

/// Schema descriptor for one entity type
#[derive(Debug)]
pub struct EntitySchema {
    /// Entity this schema describes; `None` for the fallback
    pub entity: Option<EntityKind>,
    /// Fields in canonical order, `id` first
    pub fields: &'static [FieldSpec],
    /// Foreign keys checked by the relational sink
    pub foreign_keys: &'static [ForeignKey],
    /// Field leading the vector description
    pub title_field: &'static str,
    /// Label of the title field
    pub title_label: &'static str,
    /// Keep fields not declared in `fields`
    pub passthrough: bool,
}

impl EntitySchema {
    /// Names of required fields, in schema order
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields
            .iter()
            .filter(|field| field.required)
            .map(|field| field.name)
    }

    /// Look up a field descriptor
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }
}

use FieldKind::{Integer, Text};

static PLAYER_FIELDS: [FieldSpec; 13] = [
    FieldSpec::required("id", Integer, None),
    FieldSpec::required("player_name", Text, Some("선수")),
    FieldSpec::required("team_id", Integer, Some("소속팀ID")),
    FieldSpec::optional("e_player_name", Text, Some("영문명")),
    FieldSpec::optional("nickname", Text, Some("별명")),
    FieldSpec::optional("join_yyyy", Text, Some("입단년도")),
    FieldSpec::optional("position", Text, Some("포지션")),
    FieldSpec::optional("back_no", Integer, Some("등번호")),
    FieldSpec::optional("nation", Text, Some("국적")),
    FieldSpec::optional("birth_date", Text, Some("생년월일")),
    FieldSpec::optional("solar", Text, Some("양력/음력")),
    FieldSpec::optional("height", Integer, Some("키")),
    FieldSpec::optional("weight", Integer, Some("몸무게")),
];

static TEAM_FIELDS: [FieldSpec; 15] = [
    FieldSpec::required("id", Integer, None),
    FieldSpec::required("team_code", Text, Some("팀코드")),
    FieldSpec::required("team_name", Text, Some("팀")),
    FieldSpec::optional("region_name", Text, Some("연고지")),
    FieldSpec::optional("e_team_name", Text, Some("영문명")),
    FieldSpec::optional("orig_yyyy", Text, Some("창단년도")),
    FieldSpec::optional("stadium_id", Integer, Some("홈구장ID")),
    FieldSpec::optional("zip_code1", Text, None),
    FieldSpec::optional("zip_code2", Text, None),
    FieldSpec::optional("address", Text, Some("주소")),
    FieldSpec::optional("ddd", Text, None),
    FieldSpec::optional("tel", Text, Some("전화번호")),
    FieldSpec::optional("fax", Text, Some("팩스")),
    FieldSpec::optional("homepage", Text, Some("홈페이지")),
    FieldSpec::optional("owner", Text, Some("구단주")),
];

static STADIUM_FIELDS: [FieldSpec; 8] = [
    FieldSpec::required("id", Integer, None),
    FieldSpec::required("stadium_code", Text, Some("경기장코드")),
    FieldSpec::required("stadium_name", Text, Some("경기장")),
    FieldSpec::optional("hometeam_id", Integer, Some("홈팀ID")),
    FieldSpec::optional("seat_count", Integer, Some("좌석수")),
    FieldSpec::optional("address", Text, Some("주소")),
    FieldSpec::optional("ddd", Text, None),
    FieldSpec::optional("tel", Text, Some("전화번호")),
];

static SCHEDULE_FIELDS: [FieldSpec; 11] = [
    FieldSpec::required("id", Integer, None),
    FieldSpec::required("stadium_id", Integer, None),
    FieldSpec::required("stadium_code", Text, Some("경기장코드")),
    FieldSpec::required("sche_date", Text, Some("경기일자")),
    FieldSpec::required("gubun", Text, Some("구분")),
    FieldSpec::required("hometeam_id", Integer, None),
    FieldSpec::required("hometeam_code", Text, Some("홈팀")),
    FieldSpec::required("awayteam_id", Integer, None),
    FieldSpec::required("awayteam_code", Text, Some("원정팀")),
    FieldSpec::optional("home_score", Integer, Some("홈팀 점수")),
    FieldSpec::optional("away_score", Integer, Some("원정팀 점수")),
];

static FALLBACK_FIELDS: [FieldSpec; 1] = [FieldSpec::required("id", Integer, None)];

/// Player schema
pub static PLAYER_SCHEMA: EntitySchema = EntitySchema {
    entity: Some(EntityKind::Player),
    fields: &PLAYER_FIELDS,
    foreign_keys: &[ForeignKey {
        field: "team_id",
        references: EntityKind::Team,
    }],
    title_field: "player_name",
    title_label: "선수",
    passthrough: false,
};

/// Team schema
pub static TEAM_SCHEMA: EntitySchema = EntitySchema {
    entity: Some(EntityKind::Team),
    fields: &TEAM_FIELDS,
    foreign_keys: &[ForeignKey {
        field: "stadium_id",
        references: EntityKind::Stadium,
    }],
    title_field: "team_name",
    title_label: "팀",
    passthrough: false,
};

/// Stadium schema
pub static STADIUM_SCHEMA: EntitySchema = EntitySchema {
    entity: Some(EntityKind::Stadium),
    fields: &STADIUM_FIELDS,
    foreign_keys: &[],
    title_field: "stadium_name",
    title_label: "경기장",
    passthrough: false,
};

/// Schedule schema
pub static SCHEDULE_SCHEMA: EntitySchema = EntitySchema {
    entity: Some(EntityKind::Schedule),
    fields: &SCHEDULE_FIELDS,
    foreign_keys: &[
        ForeignKey {
            field: "stadium_id",
            references: EntityKind::Stadium,
        },
        ForeignKey {
            field: "hometeam_id",
            references: EntityKind::Team,
        },
        ForeignKey {
            field: "awayteam_id",
            references: EntityKind::Team,
        },
    ],
    title_field: "sche_date",
    title_label: "경기일자",
    passthrough: false,
};

/// Schema for data types outside the registry: only `id` is required,
/// every other scalar field is carried through as-is.
pub static FALLBACK_SCHEMA: EntitySchema = EntitySchema {
    entity: None,
    fields: &FALLBACK_FIELDS,
    foreign_keys: &[],
    title_field: "id",
    title_label: "",
    passthrough: true,
};

/// Schema of a known entity
#[must_use]
pub const fn entity_schema(kind: EntityKind) -> &'static EntitySchema {
    match kind {
        EntityKind::Player => &PLAYER_SCHEMA,
        EntityKind::Team => &TEAM_SCHEMA,
        EntityKind::Stadium => &STADIUM_SCHEMA,
        EntityKind::Schedule => &SCHEDULE_SCHEMA,
    }
}

/// Schema of a batch data type, falling back for unknown labels
#[must_use]
pub fn schema_for(data_type: &DataType) -> &'static EntitySchema {
    data_type.entity().map_or(&FALLBACK_SCHEMA, entity_schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_required_fields() {
        let required: Vec<_> = PLAYER_SCHEMA.required_fields().collect();
        assert_eq!(required, vec!["id", "player_name", "team_id"]);
    }

    #[test]
    fn test_schedule_requires_nine_fields() {
        let required: Vec<_> = SCHEDULE_SCHEMA.required_fields().collect();
        assert_eq!(required.len(), 9);
        assert!(required.contains(&"stadium_id"));
        assert!(required.contains(&"hometeam_id"));
        assert!(required.contains(&"awayteam_id"));
    }

    #[test]
    fn test_every_schema_starts_with_integer_id() {
        for kind in EntityKind::ALL {
            let schema = entity_schema(kind);
            assert_eq!(schema.entity, Some(kind));
            assert_eq!(schema.fields[0].name, "id");
            assert_eq!(schema.fields[0].kind, FieldKind::Integer);
            assert!(schema.field(schema.title_field).is_some());
            for fk in schema.foreign_keys {
                assert!(schema.field(fk.field).is_some(), "{kind}: {}", fk.field);
            }
        }
    }

    #[test]
    fn test_unknown_data_type_uses_fallback() {
        let schema = schema_for(&DataType::parse("referee"));
        assert!(schema.entity.is_none());
        assert!(schema.passthrough);
        assert_eq!(schema.required_fields().collect::<Vec<_>>(), vec!["id"]);
    }
}
