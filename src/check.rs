use serde_json::Value;

pub struct Check<T> {
    pub name: String,
    pub func: Box<dyn Fn(&T) -> Result<(), String> + Send + Sync>,
}

impl<T> Check<T> {
    pub fn new(
        name: &str,
        func: impl Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Check {
            name: name.into(),
            func: Box::new(func),
        }
    }

    pub fn perform(&self, resource: &T) -> Result<(), String> {
        if let Err(err) = (self.func)(resource) {
            Err(format!("failed on: {}: {}", self.name, err))
        } else {
            Ok(())
        }
    }
}

impl<T> std::fmt::Debug for Check<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish()
    }
}

/// Run every check, returning the first failure.
pub fn perform_all<T>(checks: &[Check<T>], resource: &T) -> Result<(), String> {
    checks.iter().try_for_each(|check| check.perform(resource))
}

pub fn names<T>(checks: &[Check<T>]) -> String {
    checks
        .iter()
        .map(|check| check.name.clone())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn not<T: 'static>(inner: Check<T>) -> Check<T> {
    Check {
        name: format!("not {}", inner.name),
        func: Box::new(move |resource: &T| match (inner.func)(resource) {
            Err(_) => Ok(()),
            Ok(()) => Err("was true".to_string()),
        }),
    }
}

/// The status condition of type `type_` is present and has `status`.
pub fn has_condition(type_: &str, status: &str) -> Check<Value> {
    let (type_, status) = (type_.to_string(), status.to_string());

    Check::new(&format!("has-condition-{type_}"), move |object: &Value| {
        let Some(condition) = condition(object, &type_) else {
            return Err(format!("no {type_} condition"));
        };

        match condition.get("status").and_then(Value::as_str) {
            Some(actual) if actual == status => Ok(()),
            actual => Err(format!(r#"{type_} is {actual:?}, expected "{status}""#)),
        }
    })
}

/// The field at JSON `pointer` (e.g. `/spec/paused`) equals `expected`.
pub fn field_equals(pointer: &str, expected: Value) -> Check<Value> {
    let pointer = pointer.to_string();

    Check::new(&format!("field-equals-{pointer}"), move |object: &Value| {
        match object.pointer(&pointer) {
            Some(actual) if actual == &expected => Ok(()),
            Some(actual) => Err(format!("{pointer} is {actual}, expected {expected}")),
            None => Err(format!("{pointer} not present")),
        }
    })
}

pub fn field_present(pointer: &str) -> Check<Value> {
    let pointer = pointer.to_string();

    Check::new(&format!("field-present-{pointer}"), move |object: &Value| {
        match object.pointer(&pointer) {
            Some(Value::Null) | None => Err(format!("{pointer} not present")),
            Some(_) => Ok(()),
        }
    })
}

/// Looks up a status condition by type.
pub fn condition<'a>(object: &'a Value, type_: &str) -> Option<&'a Value> {
    object
        .pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|condition| condition.get("type").and_then(Value::as_str) == Some(type_))
}
