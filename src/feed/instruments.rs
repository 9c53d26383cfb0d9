use std::collections::HashMap;

const DEFAULT_PIP: f64 = 0.0001;
const DEFAULT_TICK_VALUE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstrumentSpec {
    pub pip_size: f64,
    /// Account currency value of one pip on one standard lot.
    pub tick_value: f64,
}

/// Static pip-size and tick-value lookup.
#[derive(Debug, Clone)]
pub struct InstrumentTable {
    specs: HashMap<String, InstrumentSpec>,
}

impl Default for InstrumentTable {
    fn default() -> Self {
        let mut specs = HashMap::new();
        let mut put = |symbol: &str, pip_size: f64, tick_value: f64| {
            specs.insert(symbol.to_string(), InstrumentSpec { pip_size, tick_value });
        };

        put("XAUUSD", 0.1, 1.0);
        put("XAGUSD", 0.01, 50.0);
        for major in ["EURUSD", "GBPUSD", "AUDUSD", "NZDUSD", "USDCAD", "USDCHF"] {
            put(major, 0.0001, 10.0);
        }
        put("USDJPY", 0.01, 6.5);
        put("BTCUSD", 1.0, 1.0);
        put("ETHUSD", 0.1, 1.0);
        put("US30", 1.0, 1.0);
        put("NAS100", 1.0, 1.0);

        Self { specs }
    }
}

impl InstrumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spec(mut self, symbol: &str, pip_size: f64, tick_value: f64) -> Self {
        self.specs
            .insert(symbol.to_uppercase(), InstrumentSpec { pip_size, tick_value });
        self
    }

    pub fn spec(&self, symbol: &str) -> InstrumentSpec {
        let symbol = symbol.to_uppercase();
        if let Some(spec) = self.specs.get(&symbol) {
            return *spec;
        }
        // Unlisted yen crosses quote to two decimals.
        if symbol.ends_with("JPY") {
            return InstrumentSpec {
                pip_size: 0.01,
                tick_value: 6.5,
            };
        }
        InstrumentSpec {
            pip_size: DEFAULT_PIP,
            tick_value: DEFAULT_TICK_VALUE,
        }
    }

    pub fn pip_size(&self, symbol: &str) -> f64 {
        self.spec(symbol).pip_size
    }

    pub fn tick_value(&self, symbol: &str) -> f64 {
        self.spec(symbol).tick_value
    }
}
