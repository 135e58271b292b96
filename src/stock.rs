// src/stock.rs
use crate::db::Store;
use crate::market::{get_company_name, MarketData};
use crate::watchlist::check_watchlist_status;
use serde::Serialize;
use serde_json::{json, Value};

pub const WIDGET_SCRIPT_BASE: &str = "https://s3.tradingview.com/external-embedding/embed-widget-";

/// One embedded TradingView widget; the browser renders it from the config.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub name: &'static str,
    pub script_url: String,
    pub config: Value,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockDetails {
    pub symbol: String,
    pub company: String,
    pub is_in_watchlist: bool,
    pub widgets: Vec<Widget>,
}

fn widget(name: &'static str, script: &str, height: u32, config: Value) -> Widget {
    Widget {
        name,
        script_url: format!("{}{}.js", WIDGET_SCRIPT_BASE, script),
        config,
        height,
    }
}

fn chart_config(symbol: &str, style: u8) -> Value {
    json!({
        "allow_symbol_change": false,
        "calendar": false,
        "details": true,
        "hide_side_toolbar": true,
        "hide_top_toolbar": false,
        "hide_legend": false,
        "hide_volume": false,
        "hotlist": false,
        "interval": "D",
        "locale": "en",
        "save_image": false,
        "style": style,
        "symbol": symbol,
        "theme": "dark",
        "timezone": "Etc/UTC",
        "backgroundColor": "#141414",
        "gridColor": "#141414",
        "watchlist": [],
        "withdateranges": false,
        "compareSymbols": [],
        "studies": [],
        "width": "100%",
        "height": 600
    })
}

pub fn widgets_for(symbol: &str) -> Vec<Widget> {
    let symbol = symbol.to_uppercase();
    vec![
        widget(
            "symbol-info",
            "symbol-info",
            170,
            json!({
                "symbol": symbol,
                "colorTheme": "dark",
                "isTransparent": true,
                "locale": "en",
                "width": "100%"
            }),
        ),
        widget("candle-chart", "advanced-chart", 600, chart_config(&symbol, 1)),
        widget("baseline-chart", "advanced-chart", 600, chart_config(&symbol, 10)),
        widget(
            "technical-analysis",
            "technical-analysis",
            400,
            json!({
                "symbol": symbol,
                "colorTheme": "dark",
                "isTransparent": true,
                "locale": "en",
                "width": "100%",
                "height": 400,
                "interval": "1h",
                "largeChartUrl": ""
            }),
        ),
        widget(
            "company-profile",
            "symbol-profile",
            440,
            json!({
                "symbol": symbol,
                "colorTheme": "dark",
                "isTransparent": true,
                "locale": "en",
                "width": "100%",
                "height": 440
            }),
        ),
        widget(
            "financials",
            "financials",
            464,
            json!({
                "symbol": symbol,
                "colorTheme": "dark",
                "isTransparent": true,
                "locale": "en",
                "width": "100%",
                "height": 464,
                "displayMode": "regular",
                "largeChartUrl": ""
            }),
        ),
    ]
}

pub async fn stock_details(
    store: &dyn Store,
    market: &dyn MarketData,
    symbol: &str,
    user_id: Option<&str>,
) -> StockDetails {
    let symbol = symbol.trim().to_uppercase();
    let company = get_company_name(market, &symbol).await;
    let is_in_watchlist = match user_id {
        Some(id) => check_watchlist_status(store, id, &symbol).await,
        None => false,
    };
    StockDetails {
        widgets: widgets_for(&symbol),
        symbol,
        company,
        is_in_watchlist,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::testing::StubMarket;
    use crate::memory::MemoryStore;
    use crate::models::CompanyProfile;
    use crate::watchlist::add_to_watchlist;

    #[test]
    fn every_widget_targets_the_symbol() {
        let widgets = widgets_for("aapl");
        assert_eq!(widgets.len(), 6);
        for w in &widgets {
            assert_eq!(w.config["symbol"], "AAPL");
            assert!(w.script_url.starts_with(WIDGET_SCRIPT_BASE));
        }
        assert_eq!(widgets[1].config["style"], 1);
        assert_eq!(widgets[2].config["style"], 10);
        assert!(widgets[1].script_url.ends_with("advanced-chart.js"));
    }

    #[tokio::test]
    async fn details_reflect_profile_and_watchlist() {
        let store = MemoryStore::new();
        let mut market = StubMarket::configured();
        market.profiles.insert(
            "AMD".to_string(),
            CompanyProfile {
                name: Some("Advanced Micro Devices".to_string()),
                ..Default::default()
            },
        );
        add_to_watchlist(&store, "u1", "AMD", "AMD").await.unwrap();

        let details = stock_details(&store, &market, "amd", Some("u1")).await;
        assert_eq!(details.symbol, "AMD");
        assert_eq!(details.company, "Advanced Micro Devices");
        assert!(details.is_in_watchlist);

        let anonymous = stock_details(&store, &market, "amd", None).await;
        assert!(!anonymous.is_in_watchlist);
    }
}
