//! Rounding of numeric fields so that repeated round trips are stable.

use anyhow::Result;
use serde_json::{Map, Number, Value};

use crate::error::ModError;

fn canonical(value: f64) -> f64 {
    // -0.0 == 0.0, so this also folds negative zero.
    if value == 0.0 { 0.0 } else { value }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let ratio = 10f64.powi(places);
    canonical((value * ratio).round() / ratio)
}

pub fn smooth_position(value: f64) -> f64 {
    round_to(value, 3)
}

/// Whole degrees in `[0, 360)`.
pub fn smooth_angle(value: f64) -> f64 {
    canonical(value.round().rem_euclid(360.0))
}

pub fn smooth_color(value: f64) -> f64 {
    round_to(value, 5)
}

pub fn smooth_scale(value: f64) -> f64 {
    round_to(value, 2)
}

type Rounder = fn(f64) -> f64;

const FIELD_ROUNDERS: &[(&str, Rounder)] = &[
    ("posX", smooth_position),
    ("posY", smooth_position),
    ("posZ", smooth_position),
    ("rotX", smooth_angle),
    ("rotY", smooth_angle),
    ("rotZ", smooth_angle),
    ("scaleX", smooth_scale),
    ("scaleY", smooth_scale),
    ("scaleZ", smooth_scale),
    ("r", smooth_color),
    ("g", smooth_color),
    ("b", smooth_color),
    ("a", smooth_color),
];

const VECTOR_KEYS: [&str; 3] = ["x", "y", "z"];

fn to_value(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn round_in_place(value: &mut Value, round: Rounder) -> bool {
    match value.as_f64() {
        Some(number) => {
            *value = to_value(round(number));
            true
        }
        None => false,
    }
}

/// Round the transform and color keys of `fields`; anything else,
/// including non-numeric values under those keys, is left alone.
pub fn smooth_fields(fields: &mut Map<String, Value>) {
    for (key, round) in FIELD_ROUNDERS {
        if let Some(value) = fields.get_mut(*key) {
            round_in_place(value, *round);
        }
    }
}

/// Round an `{x, y, z}` object. Keys outside x/y/z, or non-numeric values,
/// are shape errors.
pub fn smooth_vector(key: &str, value: &mut Value, round: Rounder) -> Result<()> {
    let vector = match value {
        Value::Object(vector) => vector,
        other => return Err(ModError::shape(key, "an {x, y, z} object", other).into()),
    };
    for (axis, component) in vector.iter_mut() {
        if !VECTOR_KEYS.contains(&axis.as_str()) {
            return Err(ModError::Shape {
                key: format!("{}.{}", key, axis),
                expected: "only x, y and z keys",
                found: "an unexpected key".to_owned(),
            }
            .into());
        }
        if !round_in_place(component, round) {
            return Err(ModError::shape(format!("{}.{}", key, axis), "a number", component).into());
        }
    }
    Ok(())
}

/// Round every snap point in an array.
///
/// Each point may carry `Position`, `Rotation` and `Tags`; `Tags` passes
/// through untouched.
pub fn smooth_snap_points(key: &str, value: &mut Value) -> Result<()> {
    let points = match value {
        Value::Array(points) => points,
        other => return Err(ModError::shape(key, "an array of snap points", other).into()),
    };
    for (idx, point) in points.iter_mut().enumerate() {
        let point_key = format!("{}[{}]", key, idx);
        let fields = match point {
            Value::Object(fields) => fields,
            other => return Err(ModError::shape(point_key, "a snap point object", other).into()),
        };
        for (name, field) in fields.iter_mut() {
            match name.as_str() {
                "Position" => smooth_vector(&format!("{}.Position", point_key), field, smooth_position)?,
                "Rotation" => smooth_vector(&format!("{}.Rotation", point_key), field, smooth_angle)?,
                "Tags" => {}
                other => {
                    return Err(ModError::Shape {
                        key: format!("{}.{}", point_key, other),
                        expected: "Position, Rotation or Tags",
                        found: "an unexpected key".to_owned(),
                    }
                    .into());
                }
            }
        }
    }
    Ok(())
}

/// Smooth the transform-shaped fields of one object node.
pub fn smooth_object(data: &mut Map<String, Value>) -> Result<()> {
    for key in ["Transform", "ColorDiffuse"] {
        if let Some(Value::Object(fields)) = data.get_mut(key) {
            smooth_fields(fields);
        }
    }
    if let Some(angle) = data.get_mut("AltLookAngle") {
        smooth_vector("AltLookAngle", angle, smooth_angle)?;
    }
    if let Some(points) = data.get_mut("AttachedSnapPoints") {
        smooth_snap_points("AttachedSnapPoints", points)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_angles_wrap_into_range() {
        assert_eq!(smooth_angle(370.0), 10.0);
        assert_eq!(smooth_angle(-89.83327), 270.0);
        assert_eq!(smooth_angle(359.6), 0.0);
        assert_eq!(smooth_angle(-400.0), 320.0);
        let zero = smooth_angle(-0.004);
        assert_eq!(zero, 0.0);
        assert!(zero.is_sign_positive());
    }

    #[test]
    fn test_negative_zero_is_canonical() {
        let pos = smooth_position(-0.000_000_1);
        assert_eq!(pos, 0.0);
        assert!(pos.is_sign_positive());
        assert!(smooth_color(-0.000_000_1).is_sign_positive());
        assert!(smooth_scale(-0.001).is_sign_positive());
    }

    #[test]
    fn test_precisions() {
        assert_eq!(smooth_position(1.234_56), 1.235);
        assert_eq!(smooth_scale(42.410_194_4), 42.41);
        assert_eq!(smooth_color(0.333_333_333), 0.33333);
    }

    #[test]
    fn test_smooth_fields_leaves_other_keys() {
        let mut fields = object(json!({
            "posX": 1.00049, "rotY": 181.5, "scaleZ": 0.999, "r": 0.123456789,
            "label": "keep", "posY": "not a number"
        }));
        smooth_fields(&mut fields);
        assert_eq!(
            Value::Object(fields),
            json!({
                "posX": 1.0, "rotY": 182.0, "scaleZ": 1.0, "r": 0.12346,
                "label": "keep", "posY": "not a number"
            })
        );
    }

    #[test]
    fn test_smooth_vector_rejects_unknown_keys() {
        let mut value = json!({"x": 1.0, "y": 2.0, "foobar": 3.0});
        let err = smooth_vector("AltLookAngle", &mut value, smooth_angle).unwrap_err();
        assert!(err.to_string().contains("foobar"));
    }

    #[test]
    fn test_smooth_vector_rejects_non_numbers() {
        let mut value = json!({"x": "1"});
        assert!(smooth_vector("AltLookAngle", &mut value, smooth_angle).is_err());
    }

    #[test]
    fn test_snap_points() {
        let mut points = json!([
            {"Position": {"x": 1.23456, "y": -0.0001, "z": 3.0}, "Rotation": {"y": 269.7}, "Tags": ["a"]},
            {"Position": {"x": 0.5}}
        ]);
        smooth_snap_points("SnapPoints", &mut points).unwrap();
        assert_eq!(
            points,
            json!([
                {"Position": {"x": 1.235, "y": 0.0, "z": 3.0}, "Rotation": {"y": 270.0}, "Tags": ["a"]},
                {"Position": {"x": 0.5}}
            ])
        );

        let mut bad = json!([{"Position": {"x": 1.0}, "Scale": {}}]);
        let err = smooth_snap_points("SnapPoints", &mut bad).unwrap_err();
        assert!(err.to_string().contains("Scale"));
    }

    #[test]
    fn test_smooth_object_is_idempotent() {
        let mut data = object(json!({
            "GUID": "abc123",
            "Transform": {"posX": -0.0004, "rotX": 370.2, "scaleX": 1.004},
            "ColorDiffuse": {"r": 0.713235259, "g": 0.0, "b": 0.0},
            "AltLookAngle": {"x": -89.83327, "y": 0.0, "z": 0.0}
        }));
        smooth_object(&mut data).unwrap();
        let once = data.clone();
        smooth_object(&mut data).unwrap();
        assert_eq!(data, once);
        assert_eq!(
            data["Transform"],
            json!({"posX": 0.0, "rotX": 10.0, "scaleX": 1.0})
        );
        assert_eq!(data["AltLookAngle"], json!({"x": 270.0, "y": 0.0, "z": 0.0}));
        assert_eq!(data["ColorDiffuse"]["r"], json!(0.71324));
    }
}
