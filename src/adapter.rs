//! Turns captured `StateDataReporter` output into samples.

use crate::channel::{Sample, SampleSender};
use crate::errors::AdapterError;

/// Field separator the reporter uses unless configured otherwise.
pub const DEFAULT_SEPARATOR: &str = ",";

/// Text one reporter callback wrote, captured instead of going to a file.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub text: String,
    pub separator: String,
}

impl Invocation {
    pub fn new(text: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            separator: separator.into(),
        }
    }
}

/// Parses reporter invocations and pushes one sample per invocation.
///
/// The first invocation carries a header line followed by the first data
/// line; the field names found there hold for the rest of the run.
#[derive(Debug)]
pub struct ReporterAdapter {
    sender: SampleSender,
    headers: Option<Vec<String>>,
}

impl ReporterAdapter {
    pub fn new(sender: SampleSender) -> Self {
        Self {
            sender,
            headers: None,
        }
    }

    #[cfg(test)]
    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    /// Parse `invocation` and push the resulting sample.
    pub fn report(&mut self, invocation: &Invocation) -> Result<(), AdapterError> {
        let sample = self.parse(invocation)?;
        if !self.sender.send_sample(sample) {
            log::debug!("plot consumer is gone; sample dropped");
        }
        Ok(())
    }

    /// Parse without sending.
    pub fn parse(&mut self, invocation: &Invocation) -> Result<Sample, AdapterError> {
        let separator = if invocation.separator.is_empty() {
            DEFAULT_SEPARATOR
        } else {
            invocation.separator.as_str()
        };

        let line = if self.headers.is_some() {
            invocation.text.as_str()
        } else {
            let (header, rest) = invocation
                .text
                .split_once('\n')
                .ok_or(AdapterError::MissingDataLine)?;
            if rest.trim().is_empty() {
                return Err(AdapterError::MissingDataLine);
            }
            let names = parse_header(header, separator);
            log::debug!("reporter fields: {:?}", names);
            self.headers = Some(names);
            rest
        };

        let headers = self.headers.as_deref().unwrap_or_default();
        parse_values(headers, line, separator)
    }
}

/// Split a header line and strip comment/quote decoration from each name.
pub fn parse_header(line: &str, separator: &str) -> Vec<String> {
    line.trim()
        .split(separator)
        .map(|name| {
            name.trim()
                .trim_matches(|c| matches!(c, '#' | '"' | '\''))
                .to_string()
        })
        .collect()
}

fn parse_values(headers: &[String], line: &str, separator: &str) -> Result<Sample, AdapterError> {
    let raw: Vec<&str> = line.trim().split(separator).map(str::trim).collect();
    if raw.len() != headers.len() {
        return Err(AdapterError::FieldCountMismatch {
            headers: headers.len(),
            values: raw.len(),
        });
    }

    headers
        .iter()
        .zip(raw)
        .map(|(name, value)| {
            value
                .parse::<f64>()
                .map(|v| (name.clone(), v))
                .map_err(|_| AdapterError::InvalidNumber {
                    field: name.clone(),
                    value: value.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{sample_channel, Message};

    const HEADER: &str = "#\"Step\",\"Temperature\",\"Potential Energy\"";

    #[test]
    fn first_invocation_reads_header_and_data() {
        let (tx, rx) = sample_channel();
        let mut adapter = ReporterAdapter::new(tx);

        let text = format!("{HEADER}\n10,300.5,-1234.6\n");
        adapter.report(&Invocation::new(text, ",")).unwrap();

        assert_eq!(
            adapter.headers().unwrap(),
            ["Step", "Temperature", "Potential Energy"]
        );
        let messages: Vec<Message> = rx.try_iter().collect();
        assert_eq!(
            messages,
            vec![Message::Sample(Sample::new(vec![
                ("Step".into(), 10.0),
                ("Temperature".into(), 300.5),
                ("Potential Energy".into(), -1234.6),
            ]))]
        );
    }

    #[test]
    fn later_invocations_are_data_only() {
        let (tx, rx) = sample_channel();
        let mut adapter = ReporterAdapter::new(tx);
        adapter
            .report(&Invocation::new(format!("{HEADER}\n10,300.5,-1234.6\n"), ","))
            .unwrap();
        adapter
            .report(&Invocation::new("20,301.0,-1240.0\n", ","))
            .unwrap();
        adapter
            .report(&Invocation::new("30,299.8,-1250.5\n", ","))
            .unwrap();

        let steps: Vec<f64> = rx
            .try_iter()
            .map(|m| match m {
                Message::Sample(s) => s.get("Step").unwrap(),
                Message::EndOfStream => panic!("unexpected end"),
            })
            .collect();
        assert_eq!(steps, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn custom_separator_and_crlf() {
        let (tx, _rx) = sample_channel();
        let mut adapter = ReporterAdapter::new(tx);
        let sample = adapter
            .parse(&Invocation::new("#\"Time (ps)\"\t\"Volume\"\r\n0.2\t12.5\r\n", "\t"))
            .unwrap();
        assert_eq!(sample.get("Time (ps)"), Some(0.2));
        assert_eq!(sample.get("Volume"), Some(12.5));
    }

    #[test]
    fn header_value_count_mismatch_is_fatal() {
        let (tx, rx) = sample_channel();
        let mut adapter = ReporterAdapter::new(tx);
        let err = adapter
            .report(&Invocation::new(format!("{HEADER}\n10,300.5\n"), ","))
            .unwrap_err();
        assert_eq!(
            err,
            AdapterError::FieldCountMismatch {
                headers: 3,
                values: 2
            }
        );
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn non_numeric_value_is_fatal() {
        let (tx, _rx) = sample_channel();
        let mut adapter = ReporterAdapter::new(tx);
        let err = adapter
            .parse(&Invocation::new(format!("{HEADER}\n10,hot,-1.0\n"), ","))
            .unwrap_err();
        assert_eq!(
            err,
            AdapterError::InvalidNumber {
                field: "Temperature".into(),
                value: "hot".into()
            }
        );
    }

    #[test]
    fn first_invocation_without_data_line_is_fatal() {
        let (tx, _rx) = sample_channel();
        let mut adapter = ReporterAdapter::new(tx);
        assert_eq!(
            adapter.parse(&Invocation::new(HEADER, ",")),
            Err(AdapterError::MissingDataLine)
        );
        assert_eq!(
            adapter.parse(&Invocation::new(format!("{HEADER}\n"), ",")),
            Err(AdapterError::MissingDataLine)
        );
    }

    #[test]
    fn empty_separator_falls_back_to_comma() {
        let (tx, _rx) = sample_channel();
        let mut adapter = ReporterAdapter::new(tx);
        let sample = adapter
            .parse(&Invocation::new("#\"Step\",\"Speed (ns/day)\"\n5,0\n", ""))
            .unwrap();
        assert_eq!(sample.field_names(), vec!["Step", "Speed (ns/day)"]);
    }
}
