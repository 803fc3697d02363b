pub mod direction;
pub mod frame;
pub mod timeframe;
pub mod trade_record;

pub use direction::*;
pub use frame::{PixelBuffer, PriceSample};
pub use timeframe::Timeframe;
pub use trade_record::{
    CheckUpdate, NewAnalysis, RecordId, Resolution, Target, TradeRecord, ValidatedAnalysis,
    ValidationError,
};
