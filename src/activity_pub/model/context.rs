//! JSON-LD context constants, one per concrete vocabulary type.

use serde_json::{Value, json};

use super::vocab::{AS_CONTEXT, SECURITY_CONTEXT, is_actor_type};

/// The declared context for a serialized object of the given type. Never
/// stored; regenerated on every rendering.
pub(crate) fn context_for(kind: Option<&str>) -> Value {
    match kind {
        Some(kind) if is_actor_type(kind) => json!([
            AS_CONTEXT,
            SECURITY_CONTEXT,
            {
                "manuallyApprovesFollowers": "as:manuallyApprovesFollowers",
                "alsoKnownAs": { "@id": "as:alsoKnownAs", "@type": "@id" },
                "movedTo": { "@id": "as:movedTo", "@type": "@id" },
            }
        ]),
        Some("Note" | "Article" | "Question") => json!([
            AS_CONTEXT,
            { "sensitive": "as:sensitive" }
        ]),
        _ => Value::String(AS_CONTEXT.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::{AS_CONTEXT, context_for};

    #[test]
    fn actor_types_get_the_extended_context() {
        let context = context_for(Some("Person"));
        let array = context.as_array().unwrap();
        assert_eq!(array[0], AS_CONTEXT);
        assert!(array[2].get("movedTo").is_some());
    }

    #[test]
    fn activities_get_the_plain_context() {
        assert_eq!(context_for(Some("Follow")), AS_CONTEXT);
        assert_eq!(context_for(None), AS_CONTEXT);
    }
}
