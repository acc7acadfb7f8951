use crate::condition::Condition;
use crate::config::types::{ConfigFile, CrawlRules, CrawlerConfig, ElementRule, StripperConfig};
use crate::dom::XPath;
use crate::state::{How, Identification};
use crate::url::normalize_landing_url;
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &ConfigFile) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_strippers(&config.strippers)?;
    validate_rules(&config.rules)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    normalize_landing_url(&config.url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid landing url '{}': {}", config.url, e)))?;

    if config.max_crawlers < 1 {
        return Err(ConfigError::Validation(format!(
            "max_crawlers must be >= 1, got {}",
            config.max_crawlers
        )));
    }

    if config.ignore_frames.iter().any(|f| f.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "ignore_frames cannot contain empty frame names".to_string(),
        ));
    }

    for host in &config.allowed_hosts {
        validate_host_pattern(host)?;
    }

    Ok(())
}

/// Validates an allowed-host pattern (supports the `*.` wildcard)
fn validate_host_pattern(pattern: &str) -> Result<(), ConfigError> {
    let host = pattern.strip_prefix("*.").unwrap_or(pattern);
    if host.is_empty() {
        return Err(ConfigError::InvalidPattern(format!(
            "Host pattern '{}' has no host",
            pattern
        )));
    }

    if !host
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
        || host.starts_with('.')
        || host.ends_with('.')
        || host.contains("..")
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Host pattern '{}' is not a valid host name",
            pattern
        )));
    }

    Ok(())
}

fn validate_strippers(strippers: &[StripperConfig]) -> Result<(), ConfigError> {
    for stripper in strippers {
        match stripper {
            StripperConfig::Attribute { names } if names.is_empty() => {
                return Err(ConfigError::Validation(
                    "attribute stripper needs at least one attribute name".to_string(),
                ));
            }
            StripperConfig::Tag { name } if name.trim().is_empty() => {
                return Err(ConfigError::Validation(
                    "tag stripper needs a tag name".to_string(),
                ));
            }
            _ => {}
        }
        stripper.into_stripper()?;
    }
    Ok(())
}

fn validate_rules(rules: &CrawlRules) -> Result<(), ConfigError> {
    for rule in rules.include.iter().chain(&rules.exclude) {
        validate_element_rule(rule)?;
    }

    for cc in &rules.crawl_conditions {
        validate_condition(&cc.condition)?;
        for c in &cc.preconditions {
            validate_condition(c)?;
        }
    }

    for invariant in &rules.invariants {
        if invariant.description.trim().is_empty() {
            return Err(ConfigError::Validation(
                "invariants need a description".to_string(),
            ));
        }
        validate_condition(&invariant.condition)?;
        for c in &invariant.preconditions {
            validate_condition(c)?;
        }
    }

    for wait in &rules.wait_conditions {
        if wait.expected.is_empty() {
            return Err(ConfigError::Validation(format!(
                "wait condition for '{}' expects nothing",
                wait.url
            )));
        }
    }

    for form in &rules.forms {
        validate_identification(&form.trigger)?;
        for input in &form.inputs {
            validate_identification(&input.identification)?;
        }
    }

    Ok(())
}

fn validate_element_rule(rule: &ElementRule) -> Result<(), ConfigError> {
    if rule.tag.trim().is_empty() {
        return Err(ConfigError::Validation(
            "element rules need a tag (use '*' for any)".to_string(),
        ));
    }

    for xpath in rule.xpath.iter().chain(&rule.under_xpath) {
        validate_xpath(xpath)?;
    }

    for condition in &rule.conditions {
        validate_condition(condition)?;
    }

    Ok(())
}

fn validate_condition(condition: &Condition) -> Result<(), ConfigError> {
    condition
        .validate()
        .map_err(|e| ConfigError::InvalidPattern(e.to_string()))
}

fn validate_xpath(expression: &str) -> Result<(), ConfigError> {
    XPath::parse(expression)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidPattern(e.to_string()))
}

fn validate_identification(identification: &Identification) -> Result<(), ConfigError> {
    if !identification.is_valid() {
        return Err(ConfigError::Validation(format!(
            "identification by {} has an empty value",
            identification.how
        )));
    }

    match identification.how {
        How::Xpath => validate_xpath(&identification.value),
        _ => Ok(()),
    }
}
