//! Maintains the bookkeeping attributes every entry carries (`entryUUID`,
//! creation and modification stamps) and keeps users from writing them.

use chrono::Utc;
use uuid::Uuid;

use crate::entry::{Attribute, Entry, Modification, Value};
use crate::error::{DirError, ResultCode, Result};
use crate::interceptor::{
    Interceptor, Next, OperationContext, Request, Response, OPERATIONAL_ATTRIBUTE,
};
use crate::schema::{oids, SchemaRegistry};

/// The operational attribute interceptor.
#[derive(Debug, Default)]
pub struct OperationalAttributeInterceptor;

impl OperationalAttributeInterceptor {
    /// New interceptor.
    pub fn new() -> Self {
        Self
    }
}

/// Current time in generalized time form.
pub fn generalized_time() -> String {
    Utc::now().format("%Y%m%d%H%M%SZ").to_string()
}

fn check_user_modifiable<'a>(
    schema: &SchemaRegistry,
    attributes: impl Iterator<Item = &'a Attribute>,
) -> Result<()> {
    for attr in attributes {
        let at = schema.lookup_attribute_type(attr.oid().unwrap_or(attr.id()))?;
        if at.no_user_modification {
            return Err(DirError::SchemaViolation {
                code: ResultCode::ConstraintViolation,
                message: format!("attribute '{}' cannot be modified by users", at.name()),
            });
        }
    }
    Ok(())
}

fn stamp(schema: &SchemaRegistry, oid: &str, up: &str, norm: &str) -> Result<Attribute> {
    let at = schema.lookup_attribute_type(oid)?;
    Ok(Attribute::from_type(&at, vec![Value::normalized(up, norm)]))
}

fn stamp_new_entry(schema: &SchemaRegistry, entry: &mut Entry, creator: (&str, &str)) -> Result<()> {
    let uuid = Uuid::new_v4().to_string();
    let now = generalized_time();
    entry.put(stamp(schema, oids::ENTRY_UUID, &uuid, &uuid)?);
    entry.put(stamp(schema, oids::CREATE_TIMESTAMP, &now, &now)?);
    entry.put(stamp(schema, oids::CREATORS_NAME, creator.0, creator.1)?);
    Ok(())
}

impl Interceptor for OperationalAttributeInterceptor {
    fn name(&self) -> &'static str {
        OPERATIONAL_ATTRIBUTE
    }

    fn process(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response> {
        let schema = next.chain().schema().as_ref();
        let principal = ctx.session.principal().dn.clone();
        match &mut ctx.request {
            Request::Add { entry } => {
                check_user_modifiable(schema, entry.attributes())?;
                stamp_new_entry(schema, entry, (principal.up_name(), principal.norm_name()))?;
            }
            Request::Modify { modifications, .. } => {
                check_user_modifiable(schema, modifications.iter().map(|m| &m.attribute))?;
                let now = generalized_time();
                modifications.push(Modification::replace(stamp(
                    schema,
                    oids::MODIFIERS_NAME,
                    principal.up_name(),
                    principal.norm_name(),
                )?));
                modifications.push(Modification::replace(stamp(
                    schema,
                    oids::MODIFY_TIMESTAMP,
                    &now,
                    &now,
                )?));
            }
            _ => {}
        }
        next.proceed(ctx)
    }
}
