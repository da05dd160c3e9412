//! Operator console: one command per stdin line.
//!
//! ```text
//! prices grade93=1300 diesel=1150     enterprise, station
//! command 2 pause "nozzle check"      station
//! status                              every role
//! start | stop [cash|card|fleet]      pump
//! grade grade95                       pump
//! ```

use anyhow::{anyhow, bail, Context, Result};
use fuelnet_core::{CommandVerb, FuelGrade, PaymentMethod, PriceSet, PumpId};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Prices(PriceSet),
    Command {
        pump_id: PumpId,
        verb: CommandVerb,
        reason: String,
    },
    Status,
    Start,
    Stop(PaymentMethod),
    Grade(FuelGrade),
    Help,
}

pub const HELP: &str = "commands: prices <grade>=<price>..., command <pump> <pause|resume|emergency_stop> [reason], status, start, stop [cash|card|fleet], grade <grade>, help";

/// Parses one console line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>> {
    let mut tokens = line.split_whitespace();
    let Some(head) = tokens.next() else {
        return Ok(None);
    };

    let command = match head.to_lowercase().as_str() {
        "prices" | "price" => ConsoleCommand::Prices(parse_prices(tokens)?),
        "command" | "cmd" => {
            let pump_id: PumpId = tokens
                .next()
                .ok_or_else(|| anyhow!("missing pump id"))?
                .parse()
                .context("invalid pump id")?;
            let verb: CommandVerb = tokens
                .next()
                .ok_or_else(|| anyhow!("missing verb"))?
                .parse()
                .map_err(|e: String| anyhow!(e))?;
            let reason = tokens.collect::<Vec<_>>().join(" ");
            ConsoleCommand::Command {
                pump_id,
                verb,
                reason: reason.trim_matches('"').to_string(),
            }
        }
        "status" => ConsoleCommand::Status,
        "start" => ConsoleCommand::Start,
        "stop" => {
            let payment = match tokens.next() {
                Some(p) => p.parse().map_err(|e: String| anyhow!(e))?,
                None => PaymentMethod::default(),
            };
            ConsoleCommand::Stop(payment)
        }
        "grade" => ConsoleCommand::Grade(FuelGrade::from(
            tokens.next().ok_or_else(|| anyhow!("missing grade"))?,
        )),
        "help" | "?" => ConsoleCommand::Help,
        other => bail!("unknown command '{}'", other),
    };

    Ok(Some(command))
}

fn parse_prices<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<PriceSet> {
    let mut pairs = Vec::new();
    for token in tokens {
        let (grade, price) = token
            .split_once('=')
            .ok_or_else(|| anyhow!("expected <grade>=<price>, got '{}'", token))?;
        let price: u64 = price
            .parse()
            .with_context(|| format!("invalid price for {}", grade))?;
        pairs.push((grade.to_string(), price));
    }
    if pairs.is_empty() {
        bail!("no prices given");
    }
    Ok(PriceSet::from_pairs(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_line() {
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn test_prices() {
        let cmd = parse_line("prices grade93=1300 diesel=1150").unwrap().unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Prices(PriceSet::from_pairs([("grade93", 1300), ("diesel", 1150)]))
        );
        assert!(parse_line("prices grade93").is_err());
        assert!(parse_line("prices grade93=-1").is_err());
        assert!(parse_line("prices").is_err());
    }

    #[test]
    fn test_command() {
        let cmd = parse_line("command 2 emergency_stop fire alarm").unwrap().unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Command {
                pump_id: PumpId::new(2),
                verb: CommandVerb::EmergencyStop,
                reason: "fire alarm".into(),
            }
        );
        assert!(parse_line("command x pause").is_err());
        assert!(parse_line("command 2 explode").is_err());
    }

    #[test]
    fn test_pump_controls() {
        assert_eq!(parse_line("start").unwrap(), Some(ConsoleCommand::Start));
        assert_eq!(
            parse_line("stop card").unwrap(),
            Some(ConsoleCommand::Stop(PaymentMethod::Card))
        );
        assert_eq!(
            parse_line("stop").unwrap(),
            Some(ConsoleCommand::Stop(PaymentMethod::Cash))
        );
        assert_eq!(
            parse_line("grade grade95").unwrap(),
            Some(ConsoleCommand::Grade("grade95".into()))
        );
        assert!(parse_line("refuel").is_err());
    }
}
