use serde_json::{Value, json};

use crate::models::AnalysisMode;

pub const USER_PROMPT: &str = "Detect the differences between the first (before) and second (after) drawing.";

/// System instruction for one tile request
pub fn system_instruction(mode: AnalysisMode, language: &str, coordinate_range: f64) -> String {
    let focus = match mode {
        AnalysisMode::Macro => {
            "Mode: overview / architectural analysis (MACRO).\n\
             - Detect walls, room layout and large structural changes.\n\
             - Ignore small noise."
        }
        AnalysisMode::Micro => {
            "Mode: detailed / equipment analysis (MICRO).\n\
             - Focus on electrical wiring, piping, outlets, switches and other equipment symbols."
        }
    };

    format!(
        "You compare the before and after versions of a technical drawing and report every difference.\n\
         \n\
         Requirements:\n\
         1. Grouping: when a device or symbol was added or removed, include the related text nearby \
         (tags, room names, notes) in the same box. Report one meaningful region, not fragments.\n\
         2. Language: write every title and description in {language}.\n\
         \n\
         {focus}\n\
         \n\
         Coordinates: use normalized coordinates from 0 to {range} in the order [xmin, ymin, xmax, ymax]. \
         For MOVED items, optionally give the previous location as moved_from [x, y] in the same space.",
        range = coordinate_range as i64,
    )
}

/// JSON schema the service is asked to answer with
pub fn response_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "title": { "type": "STRING" },
                "description": { "type": "STRING" },
                "category": { "type": "STRING", "enum": ["WIRING", "EQUIPMENT", "AREA", "TEXT"] },
                "type": { "type": "STRING", "enum": ["ADDED", "REMOVED", "MODIFIED", "MOVED"] },
                "box_2d": { "type": "ARRAY", "items": { "type": "NUMBER" } },
                "moved_from": { "type": "ARRAY", "items": { "type": "NUMBER" } }
            },
            "required": ["title", "category", "type", "box_2d"]
        }
    })
}
