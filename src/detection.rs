use serde_derive::{Deserialize, Serialize};

/// Contains (left,top) corner and (width,height) of bbox, in image pixels
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub frame: u32,
    #[serde(rename = "c")]
    pub class: i32,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    #[serde(rename = "p")]
    pub confidence: f32,
}
