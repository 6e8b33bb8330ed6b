// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Vega-Lite rendering of completed chart specifications.

use crate::error::{RenderError, RenderResult};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

pub const VEGA_LITE_SCHEMA: &str = "https://vega.github.io/schema/vega-lite/v5.json";

/// Turns a completed specification plus its data into a chart document.
pub trait ChartRenderer: Send + Sync {
    fn render(&self, spec: &Value, data: &DataFrame) -> RenderResult<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_dimension")]
    pub continuous_width: u32,
    #[serde(default = "default_dimension")]
    pub continuous_height: u32,
}

fn default_dimension() -> u32 {
    130
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            continuous_width: default_dimension(),
            continuous_height: default_dimension(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VegaLiteRenderer {
    view: ViewConfig,
}

impl VegaLiteRenderer {
    pub fn new(view: ViewConfig) -> Self {
        Self { view }
    }

    fn mark_type(mark: &str, polar: bool) -> RenderResult<&'static str> {
        let vl = match mark {
            "point" => "point",
            "bar" if polar => "arc",
            "bar" => "bar",
            "line" => "line",
            "area" => "area",
            "text" => "text",
            "tick" => "tick",
            "rect" => "rect",
            other => {
                return Err(RenderError::UnsupportedMark {
                    mark: other.to_string(),
                })
            }
        };
        Ok(vl)
    }

    fn channel(channel: &str, polar: bool) -> String {
        match (channel, polar) {
            ("x", true) => "theta".to_string(),
            ("y", true) => "radius".to_string(),
            _ => channel.to_string(),
        }
    }

    /// Scales declared on the view win over root-level shared scales.
    fn scale_for<'a>(spec: &'a Value, view: &'a Value, channel: &str) -> Option<&'a Value> {
        let find = |scales: Option<&'a Value>| {
            scales
                .and_then(Value::as_array)
                .and_then(|list| list.iter().find(|s| s["channel"] == channel))
        };
        find(view.get("scale")).or_else(|| find(spec.get("scale")))
    }

    fn field_type<'a>(spec: &'a Value, field: &str) -> Option<&'a str> {
        spec.get("field")?
            .as_array()?
            .iter()
            .find(|f| f["name"] == field)?
            .get("type")?
            .as_str()
    }

    fn encoding_type(field_type: Option<&str>, scale_type: Option<&str>) -> &'static str {
        match (scale_type, field_type) {
            (Some("ordinal"), _) => "ordinal",
            (Some("categorical"), _) => "nominal",
            (_, Some("datetime")) => "temporal",
            (Some(_), _) | (None, Some("number")) => "quantitative",
            (None, _) => "nominal",
        }
    }

    fn encoding(
        &self,
        spec: &Value,
        view: &Value,
        enc: &Value,
        data: &DataFrame,
        polar: bool,
    ) -> RenderResult<(String, Value)> {
        let channel = enc["channel"].as_str().unwrap_or("x");
        let mut out = Map::new();

        let field = enc.get("field").and_then(Value::as_str);
        if let Some(field) = field {
            if data.column(field).is_err() {
                return Err(RenderError::UnknownField {
                    field: field.to_string(),
                });
            }
            out.insert("field".into(), json!(field));
        }

        let scale = Self::scale_for(spec, view, channel);
        let scale_type = scale.and_then(|s| s["type"].as_str());
        let aggregate = enc.get("aggregate").and_then(Value::as_str);
        let ty = if aggregate == Some("count") && field.is_none() {
            "quantitative"
        } else {
            Self::encoding_type(field.and_then(|f| Self::field_type(spec, f)), scale_type)
        };
        out.insert("type".into(), json!(ty));

        if let Some(aggregate) = aggregate {
            out.insert("aggregate".into(), json!(aggregate));
        }
        if let Some(bins) = enc.get("binning").and_then(Value::as_i64) {
            out.insert("bin".into(), json!({ "maxbins": bins }));
        }
        if let Some(stack) = enc.get("stack").and_then(Value::as_str) {
            out.insert("stack".into(), json!(stack));
        }

        let mut scale_props = Map::new();
        if let Some(st @ ("log" | "sqrt" | "symlog")) = scale_type {
            scale_props.insert("type".into(), json!(st));
        }
        if let Some(zero) = scale.and_then(|s| s.get("zero")) {
            let zero = zero == "true" || zero == &Value::Bool(true);
            scale_props.insert("zero".into(), json!(zero));
        }
        if !scale_props.is_empty() {
            out.insert("scale".into(), Value::Object(scale_props));
        }

        Ok((Self::channel(channel, polar), Value::Object(out)))
    }

    fn facets(&self, spec: &Value, view: &Value, data: &DataFrame) -> RenderResult<Map<String, Value>> {
        let mut out = Map::new();
        for facet in view["facet"].as_array().into_iter().flatten() {
            let Some(field) = facet["field"].as_str() else {
                continue;
            };
            if data.column(field).is_err() {
                return Err(RenderError::UnknownField {
                    field: field.to_string(),
                });
            }
            let channel = match facet["channel"].as_str() {
                Some("row") => "row",
                _ => "column",
            };
            let mut def = Map::new();
            def.insert("field".into(), json!(field));
            let ty = match Self::field_type(spec, field) {
                Some("number") if facet.get("binning").is_some() => "quantitative",
                Some("datetime") => "temporal",
                _ => "nominal",
            };
            def.insert("type".into(), json!(ty));
            if let Some(bins) = facet.get("binning").and_then(Value::as_i64) {
                def.insert("bin".into(), json!({ "maxbins": bins }));
            }
            out.insert(channel.into(), Value::Object(def));
        }
        Ok(out)
    }

    fn render_view(&self, spec: &Value, view: &Value, data: &DataFrame) -> RenderResult<Value> {
        let polar = view["coordinates"] == "polar";
        let marks = view["mark"].as_array().cloned().unwrap_or_default();
        let facets = self.facets(spec, view, data)?;

        let mut layers = Vec::with_capacity(marks.len());
        for mark in &marks {
            let mark_type = Self::mark_type(mark["type"].as_str().unwrap_or("point"), polar)?;
            let mut encoding = Map::new();
            for enc in mark["encoding"].as_array().into_iter().flatten() {
                let (channel, def) = self.encoding(spec, view, enc, data, polar)?;
                encoding.insert(channel, def);
            }
            layers.push(json!({ "mark": mark_type, "encoding": encoding }));
        }

        match layers.len() {
            0 => Err(RenderError::MissingView),
            1 => {
                let mut unit = layers.remove(0);
                if let Some(encoding) = unit["encoding"].as_object_mut() {
                    encoding.extend(facets);
                }
                Ok(unit)
            }
            _ if facets.is_empty() => Ok(json!({ "layer": layers })),
            _ => Ok(json!({ "facet": facets, "spec": { "layer": layers } })),
        }
    }
}

impl ChartRenderer for VegaLiteRenderer {
    fn render(&self, spec: &Value, data: &DataFrame) -> RenderResult<Value> {
        let views = spec["view"]
            .as_array()
            .filter(|v| !v.is_empty())
            .ok_or(RenderError::MissingView)?;

        let mut rendered = views
            .iter()
            .map(|view| self.render_view(spec, view, data))
            .collect::<RenderResult<Vec<_>>>()?;

        let mut chart = Map::new();
        chart.insert("$schema".into(), json!(VEGA_LITE_SCHEMA));
        chart.insert("data".into(), json!({ "values": dataframe_to_values(data)? }));
        if rendered.len() == 1 {
            if let Value::Object(body) = rendered.remove(0) {
                chart.extend(body);
            }
        } else {
            chart.insert("hconcat".into(), Value::Array(rendered));
        }
        chart.insert(
            "config".into(),
            json!({
                "view": {
                    "continuousWidth": self.view.continuous_width,
                    "continuousHeight": self.view.continuous_height
                }
            }),
        );
        debug!(views = views.len(), "Rendered Vega-Lite chart");
        Ok(Value::Object(chart))
    }
}

fn column_values(column: &Column) -> RenderResult<Vec<Value>> {
    let series = column.as_materialized_series();
    let values = match series.dtype() {
        DataType::Boolean => series.bool()?.into_iter().map(|v| json!(v)).collect(),
        dt if dt.is_primitive_numeric() => series
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| match v {
                Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => json!(f as i64),
                Some(f) if f.is_finite() => json!(f),
                _ => Value::Null,
            })
            .collect(),
        _ => series
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|v| json!(v))
            .collect(),
    };
    Ok(values)
}

/// Row-oriented inline data for the chart document.
pub fn dataframe_to_values(df: &DataFrame) -> RenderResult<Vec<Value>> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    let columns = df
        .get_columns()
        .iter()
        .map(column_values)
        .collect::<RenderResult<Vec<_>>>()?;

    let rows = (0..df.height())
        .map(|row| {
            let obj: Map<String, Value> = names
                .iter()
                .zip(&columns)
                .map(|(name, values)| (name.clone(), values[row].clone()))
                .collect();
            Value::Object(obj)
        })
        .collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather() -> DataFrame {
        df!(
            "temp_max" => [12.8, 10.6, 11.7],
            "wind" => [4.7, 4.5, 2.3],
            "weather" => ["drizzle", "rain", "rain"]
        )
        .unwrap()
    }

    fn completed(mark: &str, coordinates: &str) -> Value {
        json!({
            "number_rows": 3,
            "field": [
                {"name": "temp_max", "type": "number"},
                {"name": "wind", "type": "number"},
                {"name": "weather", "type": "string"}
            ],
            "view": [{
                "coordinates": coordinates,
                "mark": [{
                    "type": mark,
                    "encoding": [
                        {"channel": "x", "field": "temp_max", "binning": 10},
                        {"channel": "y", "aggregate": "count"}
                    ]
                }],
                "scale": [
                    {"channel": "x", "type": "linear"},
                    {"channel": "y", "type": "linear", "zero": "true"}
                ]
            }]
        })
    }

    #[test]
    fn test_render_unit_chart() {
        let chart = VegaLiteRenderer::default()
            .render(&completed("bar", "cartesian"), &weather())
            .unwrap();
        assert_eq!(chart["mark"], "bar");
        assert_eq!(chart["encoding"]["x"]["field"], "temp_max");
        assert_eq!(chart["encoding"]["x"]["type"], "quantitative");
        assert_eq!(chart["encoding"]["x"]["bin"]["maxbins"], 10);
        assert_eq!(chart["encoding"]["y"]["aggregate"], "count");
        assert_eq!(chart["encoding"]["y"]["scale"]["zero"], true);
        assert_eq!(chart["config"]["view"]["continuousWidth"], 130);
        assert_eq!(chart["data"]["values"].as_array().unwrap().len(), 3);
        assert_eq!(chart["data"]["values"][1]["weather"], "rain");
    }

    #[test]
    fn test_polar_bar_becomes_arc() {
        let chart = VegaLiteRenderer::default()
            .render(&completed("bar", "polar"), &weather())
            .unwrap();
        assert_eq!(chart["mark"], "arc");
        assert!(chart["encoding"].get("theta").is_some());
        assert!(chart["encoding"].get("radius").is_some());
    }

    #[test]
    fn test_facet_and_categorical_scale() {
        let spec = json!({
            "field": [
                {"name": "wind", "type": "number"},
                {"name": "weather", "type": "string"}
            ],
            "view": [{
                "mark": [{"type": "tick", "encoding": [{"channel": "x", "field": "wind"}]}],
                "scale": [{"channel": "x", "type": "ordinal"}],
                "facet": [{"channel": "row", "field": "weather"}]
            }]
        });
        let chart = VegaLiteRenderer::default().render(&spec, &weather()).unwrap();
        assert_eq!(chart["encoding"]["x"]["type"], "ordinal");
        assert_eq!(chart["encoding"]["row"]["field"], "weather");
        assert_eq!(chart["encoding"]["row"]["type"], "nominal");
    }

    #[test]
    fn test_multiple_views_concat() {
        let mut spec = completed("point", "cartesian");
        let view = spec["view"][0].clone();
        spec["view"].as_array_mut().unwrap().push(view);
        let chart = VegaLiteRenderer::new(ViewConfig {
            continuous_width: 200,
            continuous_height: 100,
        })
        .render(&spec, &weather())
        .unwrap();
        assert_eq!(chart["hconcat"].as_array().unwrap().len(), 2);
        assert_eq!(chart["config"]["view"]["continuousHeight"], 100);
    }

    #[test]
    fn test_errors() {
        let renderer = VegaLiteRenderer::default();
        assert!(matches!(
            renderer.render(&json!({"number_rows": 3}), &weather()),
            Err(RenderError::MissingView)
        ));
        assert!(matches!(
            renderer.render(&completed("pie", "cartesian"), &weather()),
            Err(RenderError::UnsupportedMark { .. })
        ));
        let mut spec = completed("point", "cartesian");
        spec["view"][0]["mark"][0]["encoding"][0]["field"] = json!("humidity");
        assert!(matches!(
            renderer.render(&spec, &weather()),
            Err(RenderError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_integral_values_stay_integers() {
        let df = df!("n" => [1i64, 2, 3], "x" => [0.5, 1.0, 1.5]).unwrap();
        let values = dataframe_to_values(&df).unwrap();
        assert_eq!(values[0]["n"], json!(1));
        assert_eq!(values[0]["x"], json!(0.5));
        assert_eq!(values[1]["x"], json!(1));
    }
}
