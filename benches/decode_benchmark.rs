//! Benchmarks for the stream decode and dispatch hot path

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flow_trader::market::OrderSettings;
use flow_trader::parser::{subscribe_frame, ParsedMessage};
use flow_trader::types::{precision_of, round_down, round_up};
use flow_trader::{BinanceClient, Config, Market, MarketDescriptor, Symbol, TradeUpdate};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

const TRADE_FRAME: &str = r#"{"e":"trade","E":1672515782136,"s":"BTCUSDT","t":12345,"p":"16650.12000000","q":"0.00120000","b":88,"a":50,"T":1672515782136,"m":true,"M":true}"#;

fn benchmark_parse(c: &mut Criterion) {
    let wrapped = format!(r#"{{"stream":"btcusdt@trade","data":{}}}"#, TRADE_FRAME);

    c.bench_function("parse_trade_frame", |b| {
        b.iter(|| black_box(ParsedMessage::parse(black_box(TRADE_FRAME)).unwrap()))
    });

    c.bench_function("parse_combined_trade_frame", |b| {
        b.iter(|| black_box(ParsedMessage::parse(black_box(&wrapped)).unwrap()))
    });

    let symbols: Vec<String> = (0..200).map(|i| format!("SYM{}USDT", i)).collect();
    c.bench_function("subscribe_frame_200_markets", |b| {
        b.iter(|| black_box(subscribe_frame(symbols.iter().map(String::as_str), 1)))
    });
}

fn benchmark_quantize(c: &mut Criterion) {
    let price = Decimal::from_str("16650.123456").unwrap();

    c.bench_function("precision_of", |b| {
        b.iter(|| black_box(precision_of(black_box("0.00100000"))))
    });

    c.bench_function("round_price_both_ways", |b| {
        b.iter(|| {
            black_box(round_down(black_box(price), 2));
            black_box(round_up(black_box(price), 2));
        })
    });
}

fn benchmark_market_update(c: &mut Criterion) {
    let client = Arc::new(BinanceClient::new(&Config::default()).unwrap());
    let descriptor = MarketDescriptor {
        asset: Symbol::new("BTC"),
        quote: Symbol::new("USDT"),
        symbol: "BTCUSDT".to_string(),
        asset_precision: 5,
        quote_precision: 2,
    };
    let market = Market::new(descriptor, client, OrderSettings::default());
    for _ in 0..10 {
        market.register_trade_listener(Arc::new(|update: &TradeUpdate| {
            black_box(update.price);
        }));
    }

    let mut n = 0u64;
    c.bench_function("market_update_10_listeners", |b| {
        b.iter(|| {
            n += 1;
            let update = TradeUpdate {
                asset: Symbol::new("BTC"),
                quote: Symbol::new("USDT"),
                price: Decimal::from(16_000 + n % 7),
                quantity: Decimal::ONE,
                buy_order_id: None,
                sell_order_id: None,
            };
            black_box(market.update(&update));
        })
    });
}

criterion_group!(
    benches,
    benchmark_parse,
    benchmark_quantize,
    benchmark_market_update
);
criterion_main!(benches);
