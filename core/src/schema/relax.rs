use serde::Serialize;
use serde_json::{json, Value};

use super::{Field, Schema};
use crate::completion::ResponseFormat;

/// A [`Schema`] where every field accepts `null` and defaults to it.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaxedSchema {
    name: String,
    description: Option<String>,
    fields: Vec<Field>,
}

/// Names of the fields whose declared type didn't admit `null`, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MandatoryFields(Vec<String>);

/// Derives the all-optional variant of `schema` along with the fields that were mandatory in it.
pub fn relax(schema: &Schema) -> (RelaxedSchema, MandatoryFields) {
    let mandatory = schema
        .fields()
        .iter()
        .filter(|f| !f.is_nullable())
        .map(|f| f.name().to_string())
        .collect();

    let relaxed = RelaxedSchema {
        name: format!("Partial{}", schema.name()),
        description: schema.description().map(str::to_owned),
        fields: schema
            .fields()
            .iter()
            .cloned()
            .map(Field::into_nullable)
            .collect(),
    };

    (relaxed, MandatoryFields(mandatory))
}

impl RelaxedSchema {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Object schema with every property listed as required but nullable,
    /// the shape strict structured-output modes expect.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name().to_string(), f.to_property()))
            .collect();
        let required: Vec<&str> = self.fields.iter().map(Field::name).collect();

        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        });
        if let (Some(obj), Some(description)) = (schema.as_object_mut(), &self.description) {
            obj.insert("description".to_string(), json!(description));
        }
        schema
    }

    #[must_use]
    pub fn response_format(&self) -> ResponseFormat {
        ResponseFormat::new(&self.name, self.to_json_schema())
    }
}

impl MandatoryFields {
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|f| f == field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;

    #[allow(unused)]
    #[derive(JsonSchema)]
    struct Task {
        /// A short description of the task.
        description: String,
        /// The deadline for the task.
        due_date: Option<String>,
        /// The person assigned to solve the task
        responsable: String,
    }

    #[allow(unused)]
    #[derive(JsonSchema)]
    struct Person {
        name: String,
        age: u8,
        #[schemars(required)]
        /// Optional: Person's job title
        job_title: Option<String>,
        hobbies: Vec<String>,
        address: Option<Address>,
    }

    #[allow(unused)]
    #[derive(JsonSchema)]
    struct Address {
        street: String,
        city: String,
    }

    #[test]
    fn relaxing_task_keeps_required_fields_as_mandatory() {
        let schema = Schema::from_extractor::<Task>().unwrap();
        let (relaxed, mandatory) = relax(&schema);

        assert_eq!(relaxed.name(), "PartialTask");
        assert_eq!(
            mandatory.iter().collect::<Vec<_>>(),
            ["description", "responsable"]
        );
        assert!(!mandatory.contains("due_date"));

        for field in relaxed.fields() {
            assert!(field.is_nullable(), "{} should accept null", field.name());
            assert_eq!(field.default_value(), Some(&Value::Null));
            assert!(field.accepts(&Value::Null));
        }
    }

    #[test]
    fn mandatory_follows_the_reflected_type() {
        let schema = Schema::from_extractor::<Person>().unwrap();
        let (relaxed, mandatory) = relax(&schema);

        // schemars drops the null from a `#[schemars(required)]` Option
        assert_eq!(
            schema.field("job_title").map(Field::is_nullable),
            Some(false)
        );
        assert_eq!(
            mandatory.iter().collect::<Vec<_>>(),
            ["name", "age", "job_title", "hobbies"]
        );
        assert!(!mandatory.contains("address"));
        assert_eq!(relaxed.fields().len(), 5);
        assert!(relaxed.fields().iter().all(Field::is_nullable));
    }

    #[test]
    fn relaxed_json_schema_requires_every_nullable_property() {
        let schema = Schema::builder("Task")
            .description("A unit of work")
            .field(
                Field::new("description", json!({ "type": "string" }))
                    .with_description("A short description of the task."),
            )
            .field(Field::new("due_date", json!({ "type": ["string", "null"] })))
            .field(Field::new("effort", json!({ "type": "integer", "format": "uint8" })))
            .build()
            .unwrap();
        let (relaxed, _) = relax(&schema);

        assert_eq!(
            relaxed.to_json_schema(),
            json!({
                "type": "object",
                "properties": {
                    "description": {
                        "type": ["string", "null"],
                        "description": "A short description of the task."
                    },
                    "due_date": { "type": ["string", "null"] },
                    "effort": { "type": ["integer", "null"], "format": "uint8" }
                },
                "required": ["description", "due_date", "effort"],
                "additionalProperties": false,
                "description": "A unit of work"
            })
        );

        let format = relaxed.response_format();
        assert_eq!(format.name(), "PartialTask");
        assert!(format.schema()["properties"]["effort"].get("format").is_none());
    }

    #[test]
    fn relaxing_an_already_optional_schema_has_no_mandatory_fields() {
        let schema = Schema::builder("User")
            .field(Field::new("name", json!({ "type": ["string", "null"] })))
            .field(Field::new("email", json!({ "type": ["string", "null"] })))
            .build()
            .unwrap();
        let (relaxed, mandatory) = relax(&schema);

        assert!(mandatory.is_empty());
        assert_eq!(
            relaxed.field("name").map(Field::type_schema),
            Some(&json!({ "type": ["string", "null"] }))
        );
    }
}
