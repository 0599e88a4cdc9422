/*
 *  runtime/enumerate.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Device enumeration across all registered adapters
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::sync::Arc;

use log::{debug, error};

use super::error::{FpgaError, Result};
use super::properties::{Properties, RawProperties};
use super::registry::{AdapterRegistry, StopCode};
use super::table::AdapterTable;
use super::token::Token;

/// Result of an enumeration
#[derive(Debug, Default)]
pub struct Enumeration {
    /// Tokens handed to the caller, at most the requested limit
    pub tokens: Vec<Token>,
    /// Every match across all adapters, including those not returned
    pub num_matches: usize,
}

/// Builder for a device search.
///
/// A device matches when it satisfies any one of the filters; with no
/// filters every device matches.
pub struct Enumerator<'r> {
    registry: &'r AdapterRegistry,
    filters: Vec<RawProperties>,
    max_tokens: Option<usize>,
}

impl<'r> Enumerator<'r> {
    pub fn new(registry: &'r AdapterRegistry) -> Self {
        Self {
            registry,
            filters: Vec::new(),
            max_tokens: None,
        }
    }

    /// Add a filter. Fails if `filter` has been destroyed.
    pub fn filter(mut self, filter: &Properties) -> Result<Self> {
        self.filters.push(filter.to_raw()?);
        Ok(self)
    }

    /// Return at most `max` tokens. Zero only counts.
    pub fn max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn run(self) -> Result<Enumeration> {
        let Enumerator {
            registry,
            filters,
            max_tokens,
        } = self;

        let mut found = Enumeration::default();
        let mut errors = 0;

        registry.for_each_adapter(Some(&mut |adapter: &Arc<AdapterTable>| {
            let raws = match adapter.backend().enumerate(&filters) {
                Ok(raws) => raws,
                Err(FpgaError::NotSupported(_)) => {
                    debug!("{}: no enumerate, skipping", adapter.library());
                    return Ok(StopCode::Continue);
                }
                Err(e) if e.is_skippable() => return Err(e),
                Err(e) => {
                    error!("{}: enumerate failed: {}", adapter.library(), e);
                    errors += 1;
                    return Ok(StopCode::Continue);
                }
            };

            found.num_matches += raws.len();
            for raw in raws {
                // surplus tokens are destroyed as they drop
                let token = Token::from_raw(raw, Arc::clone(adapter));
                if max_tokens.is_none_or(|max| found.tokens.len() < max) {
                    found.tokens.push(token);
                }
            }
            Ok(StopCode::Continue)
        }));

        if errors > 0 {
            return Err(FpgaError::Exception(format!("{} adapter(s) failed to enumerate", errors)));
        }
        debug!("enumerated {} match(es), returning {}", found.num_matches, found.tokens.len());
        Ok(found)
    }
}
