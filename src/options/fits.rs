use serde::{Serialize, Deserialize};

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Axis { X, Y }

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FitsKeywordOptions {
    pub field_keyword:   String,
    pub filter_keyword:  String,
    pub ra_keyword:      String,
    pub dec_keyword:     String,
    pub xbin_keyword:    String,
    pub ybin_keyword:    String,
    pub xsize_keyword:   String,
    pub ysize_keyword:   String,
    pub xorigin_keyword: String,
    pub yorigin_keyword: String,

    /// Which image axis carries the RA correction, for `1/cos(dec)` scaling.
    pub ra_axis: Axis,
}

impl Default for FitsKeywordOptions {
    fn default() -> Self {
        Self {
            field_keyword:   "OBJECT".to_string(),
            filter_keyword:  "FILTER".to_string(),
            ra_keyword:      "RA".to_string(),
            dec_keyword:     "DEC".to_string(),
            xbin_keyword:    "XBINNING".to_string(),
            ybin_keyword:    "YBINNING".to_string(),
            xsize_keyword:   "NAXIS1".to_string(),
            ysize_keyword:   "NAXIS2".to_string(),
            xorigin_keyword: "XORGSUBF".to_string(),
            yorigin_keyword: "YORGSUBF".to_string(),
            ra_axis:         Axis::X,
        }
    }
}
