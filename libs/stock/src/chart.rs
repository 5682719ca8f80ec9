use charming::{
    Chart, ImageFormat, ImageRenderer,
    component::{Axis, Title},
    element::{AxisLabel, AxisType, LineStyle, NameLocation, SplitLine, Symbol, TextStyle},
    series::Line,
};

use crate::market::PriceHistory;
use crate::period::Period;
use crate::{Error, Result};

const WIDTH: u32 = 1200;
const HEIGHT: u32 = 600;

/// Chart input after filtering: one category label per plotted close.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChartSeries {
    pub categories: Vec<String>,
    pub closes: Vec<f64>,
}

impl ChartSeries {
    /// Builds the plotted series from a history map. Keys are already in
    /// chronological order. A close of exactly zero marks a bar with no
    /// trade and is left out.
    pub fn from_history(history: &PriceHistory, period: Period) -> Self {
        let mut series = ChartSeries::default();

        for (key, data) in history {
            if data.close == 0.0 {
                continue;
            }

            let label = if period.is_live() {
                key.split_once(' ').map(|(_, time)| time).unwrap_or(key)
            } else {
                key.as_str()
            };

            series.categories.push(label.to_string());
            series.closes.push(data.close);
        }

        series
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }
}

/// PNG produced for an embed attachment.
#[derive(Debug, Clone)]
pub struct ChartImage {
    pub file_name: String,
    pub png: Vec<u8>,
}

impl ChartImage {
    pub fn attachment_url(&self) -> String {
        format!("attachment://{}", self.file_name)
    }
}

pub fn chart_file_name(symbol: &str, period: Period) -> String {
    format!("{}_{}_chart.png", symbol.to_lowercase(), period.as_str())
}

/// Renders a close-price line chart. CPU bound: run it on a blocking thread.
pub fn render_line_chart(
    symbol: &str,
    currency: &str,
    period: Period,
    series: &ChartSeries,
) -> Result<ChartImage> {
    if series.is_empty() {
        return Err(Error::NoData(format!("nothing to plot for {symbol}")));
    }

    let interval = (series.categories.len() / 10).max(1) as f64 - 1.0;

    let chart = Chart::new()
        .background_color("#FFFFFF")
        .title(
            Title::new()
                .text(format!("{} over {}", symbol, period.friendly_name()))
                .right("40%")
                .text_style(TextStyle::new().font_size(14)),
        )
        .x_axis(
            Axis::new()
                .type_(AxisType::Category)
                .name("Date")
                .name_location(NameLocation::Center)
                .name_gap(25)
                .data(series.categories.clone())
                .axis_label(AxisLabel::new().interval(interval)),
        )
        .y_axis(
            Axis::new()
                .type_(AxisType::Value)
                .name(format!("Price ({currency})"))
                .name_location(NameLocation::Middle)
                .name_gap(45)
                .scale(true)
                .split_line(SplitLine::new().line_style(LineStyle::new().color("#e6e6e6"))),
        )
        .series(
            Line::new()
                .name(symbol)
                .data(series.closes.clone())
                .symbol(Symbol::None)
                .line_style(LineStyle::new().width(2).color("#5470c6")),
        );

    let mut renderer = ImageRenderer::new(WIDTH, HEIGHT);
    let png = renderer
        .render_format(ImageFormat::Png, &chart)
        .map_err(|e| Error::Chart(format!("{e:?}")))?;

    Ok(ChartImage {
        file_name: chart_file_name(symbol, period),
        png,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::PriceData;

    fn close(c: f64) -> PriceData {
        PriceData {
            close: c,
            ..Default::default()
        }
    }

    #[test]
    fn zero_close_points_are_dropped() {
        let mut history = PriceHistory::new();
        history.insert("2024-01-01".into(), close(0.0));
        history.insert("2024-01-02".into(), close(10.0));

        let series = ChartSeries::from_history(&history, Period::Year1);
        assert_eq!(series.categories, vec!["2024-01-02"]);
        assert_eq!(series.closes, vec![10.0]);
    }

    #[test]
    fn categories_follow_date_order() {
        let mut history = PriceHistory::new();
        history.insert("2024-01-10".into(), close(3.0));
        history.insert("2023-12-29".into(), close(1.0));
        history.insert("2024-01-02".into(), close(2.0));

        let series = ChartSeries::from_history(&history, Period::Month1);
        assert_eq!(
            series.categories,
            vec!["2023-12-29", "2024-01-02", "2024-01-10"]
        );
        assert_eq!(series.closes, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn intraday_labels_keep_only_time() {
        let mut history = PriceHistory::new();
        history.insert("2024-01-02 09:30".into(), close(5.0));
        history.insert("2024-01-02 09:31".into(), close(5.1));

        let series = ChartSeries::from_history(&history, Period::Day1);
        assert_eq!(series.categories, vec!["09:30", "09:31"]);
    }

    #[test]
    fn empty_series_is_rejected() {
        let err = render_line_chart("ABC", "USD", Period::Year1, &ChartSeries::default());
        assert!(matches!(err, Err(Error::NoData(_))));
    }
}
