use serde_json::{Map, Value};

/// Тело сообщения: произвольное JSON-значение.
pub type Payload = Value;

/// Метаданные сообщения. По умолчанию пустой объект.
pub type Meta = Map<String, Value>;

/// Пустые метаданные для `publish` без явного `meta`.
pub fn empty_meta() -> Meta {
    Map::new()
}
