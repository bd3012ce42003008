//! Shared schema and store fixtures for the codec tests.

use switchyard_store::{Store, StoreSnapshot};
use switchyard_types::{Enum, EnumValue, Identifier, Message, Property, PropertyReference, ScalarType, Template, Value};

pub fn status() -> Enum {
    Enum::new(
        "Status",
        [EnumValue::new("UNKNOWN", 0), EnumValue::new("PENDING", 1), EnumValue::new("SHIPPED", 2)],
    )
}

fn string(name: &str, position: i32) -> Property {
    Property::new(name, Template::scalar(ScalarType::String)).with_position(position)
}

/// Order body touching every template kind, without references.
pub fn order() -> Property {
    let customer = Message::new().with(string("name", 1)).with(string("email", 2));
    let line = Message::new()
        .with(string("sku", 1))
        .with(Property::new("price", Template::scalar(ScalarType::Double)).with_position(2));
    let contact = Message::new().with(string("email", 1)).with(string("phone", 2));

    let mut property = Property::new(
        "",
        Template::message(
            Message::new()
                .with(string("id", 1))
                .with(Property::new("quantity", Template::scalar(ScalarType::Int32)).with_position(2))
                .with(Property::new("status", Template::enumeration(status())).with_position(3))
                .with(Property::new("tags", Template::repeated(vec![Template::scalar(ScalarType::String)])).with_position(4))
                .with(Property::new("customer", Template::message(customer)).with_position(5))
                .with(Property::new("lines", Template::repeated(vec![Template::message(line)])).with_position(6))
                .with(Property::new("contact", Template::one_of(contact)).with_position(7)),
        ),
    );
    property.layout("");
    property
}

/// [`order`] with every field reading from `resource`.
pub fn bound_order(resource: &str) -> Property {
    let mut property = order();
    property.template.bind_reference(&PropertyReference::new(resource, ""));
    property
}

/// Self-referencing tree: every node has a value and child nodes of the same shape.
pub fn tree() -> Property {
    let identifier = Identifier::new("Tree");
    let node = Message::new().with(string("value", 1)).with(
        Property::new("children", Template::repeated(vec![Template::recursion(identifier.clone())])).with_position(2),
    );
    let mut property = Property::new("", Template::message(node).with_identifier(identifier));
    property.layout("");
    property
}

/// [`tree`] with every field reading from `resource`.
pub fn bound_tree(resource: &str) -> Property {
    let mut property = tree();
    property.template.bind_reference(&PropertyReference::new(resource, ""));
    property
}

/// Store holding a tree three levels deep below `input:`.
pub fn seeded_tree() -> Store {
    let store = Store::new();
    store.store_value("input:value", "a");
    store.define("input:children", 2);
    store.store_value("input:children[0].value", "b");
    store.define("input:children[0].children", 1);
    store.store_value("input:children[0].children[0].value", "c");
    store.store_value("input:children[1].value", "d");
    store
}

/// Store holding one order below `input:`.
pub fn seeded_store() -> Store {
    let store = Store::new();
    store.store_value("input:id", "A-1");
    store.store_value("input:quantity", Value::Int32(3));
    store.store_enum("input:status", 1);
    store.define("input:tags", 2);
    store.store_value("input:tags[0]", "fragile");
    store.store_value("input:tags[1]", "gift");
    store.store_value("input:customer.name", "Ada");
    store.define("input:lines", 2);
    store.store_value("input:lines[0].sku", "X-1");
    store.store_value("input:lines[0].price", 2.5);
    store.store_value("input:lines[1].sku", "X-2");
    store.store_value("input:lines[1].price", 10.0);
    store.store_value("input:contact.email", "ada@example.com");
    store
}

/// Snapshot of `store` with every key moved from `from:` to `to:`.
pub fn rebased(store: &Store, from: &str, to: &str) -> StoreSnapshot {
    let snapshot = store.snapshot();
    let rebase = |key: &String| match key.strip_prefix(&format!("{from}:")) {
        Some(rest) => format!("{to}:{rest}"),
        None => key.clone(),
    };
    StoreSnapshot {
        values: snapshot.values.iter().map(|(key, entry)| (rebase(key), entry.clone())).collect(),
        lengths: snapshot.lengths.iter().map(|(key, length)| (rebase(key), *length)).collect(),
    }
}
