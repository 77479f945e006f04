//! Little-endian byte encoding of ledger records for the journal.
//!
//! ```text
//! tag 1: SupplyTotal  [8 total]
//! tag 2: DailyMint    [8 account][4 count][4 day-from-CE]
//! tag 3: Account      [8 id][8 gold][8 tokens][8 tickets][1 vip][1+12 expiry]
//!                     [4x8 points][8 withdrawn][1 starter][7x8 stats][12 created]
//! tag 4: Card         [8 id][1 number][8 owner][3x4 stats][8 gold/day]
//!                     [12 last claim][4 level][4 attempts]
//! ```
//!
//! Timestamps are 8 bytes of seconds since the Unix epoch followed by 4 bytes
//! of sub-second nanoseconds, so a replayed record is identical to the one
//! committed.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use super::{PersistError, PersistResult, Record};
use crate::model::{Account, Card, CardStats, DailyMint, PlayerStats, Points};

const TAG_SUPPLY_TOTAL: u8 = 1;
const TAG_DAILY_MINT: u8 = 2;
const TAG_ACCOUNT: u8 = 3;
const TAG_CARD: u8 = 4;

/// Serializes a record.
pub(crate) fn encode(record: &Record) -> Vec<u8> {
    let mut buf = Vec::with_capacity(160);

    match record {
        Record::SupplyTotal(total) => {
            buf.push(TAG_SUPPLY_TOTAL);
            buf.extend_from_slice(&total.to_le_bytes());
        }
        Record::DailyMint { account_id, mint } => {
            buf.push(TAG_DAILY_MINT);
            buf.extend_from_slice(&account_id.to_le_bytes());
            buf.extend_from_slice(&mint.count.to_le_bytes());
            buf.extend_from_slice(&mint.reset_date.num_days_from_ce().to_le_bytes());
        }
        Record::Account(account) => {
            buf.push(TAG_ACCOUNT);
            buf.extend_from_slice(&account.id.to_le_bytes());
            buf.extend_from_slice(&account.gold.to_le_bytes());
            buf.extend_from_slice(&account.tokens.to_le_bytes());
            buf.extend_from_slice(&account.tournament_tickets.to_le_bytes());
            buf.push(u8::from(account.is_vip));
            match account.vip_expires_at {
                Some(expiry) => {
                    buf.push(1);
                    put_timestamp(&mut buf, expiry);
                }
                None => {
                    buf.push(0);
                    put_timestamp(&mut buf, DateTime::UNIX_EPOCH);
                }
            }
            let points = &account.points;
            for value in [points.weekly, points.monthly, points.yearly, points.total] {
                buf.extend_from_slice(&value.to_le_bytes());
            }
            buf.extend_from_slice(&account.total_tokens_withdrawn.to_le_bytes());
            buf.push(u8::from(account.starter_bonus_claimed));
            let stats = &account.stats;
            for value in [
                stats.battles,
                stats.wins,
                stats.losses,
                stats.upgrade_attempts,
                stats.successful_upgrades,
                stats.gold_earned,
                stats.gold_spent,
            ] {
                buf.extend_from_slice(&value.to_le_bytes());
            }
            put_timestamp(&mut buf, account.created_at);
        }
        Record::Card(card) => {
            buf.push(TAG_CARD);
            buf.extend_from_slice(&card.id.to_le_bytes());
            buf.push(card.card_number);
            buf.extend_from_slice(&card.owner_id.to_le_bytes());
            buf.extend_from_slice(&card.stats.atk.to_le_bytes());
            buf.extend_from_slice(&card.stats.def.to_le_bytes());
            buf.extend_from_slice(&card.stats.hp.to_le_bytes());
            buf.extend_from_slice(&card.daily_gold_production.to_le_bytes());
            put_timestamp(&mut buf, card.last_gold_claim);
            buf.extend_from_slice(&card.upgrade_level.to_le_bytes());
            buf.extend_from_slice(&card.upgrade_attempts.to_le_bytes());
        }
    }

    buf
}

fn put_timestamp(buf: &mut Vec<u8>, at: DateTime<Utc>) {
    buf.extend_from_slice(&at.timestamp().to_le_bytes());
    buf.extend_from_slice(&at.timestamp_subsec_nanos().to_le_bytes());
}

/// Deserializes a record.
pub(crate) fn decode(data: &[u8]) -> PersistResult<Record> {
    let mut reader = Reader { data };
    let record = match reader.u8()? {
        TAG_SUPPLY_TOTAL => Record::SupplyTotal(reader.u64()?),
        TAG_DAILY_MINT => {
            let account_id = reader.u64()?;
            let count = reader.u32()?;
            let reset_date = reader.date()?;
            Record::DailyMint {
                account_id,
                mint: DailyMint { count, reset_date },
            }
        }
        TAG_ACCOUNT => {
            let id = reader.u64()?;
            let gold = reader.u64()?;
            let tokens = reader.u64()?;
            let tournament_tickets = reader.u64()?;
            let is_vip = reader.bool()?;
            let has_expiry = reader.bool()?;
            let expiry = reader.timestamp()?;
            let points = Points {
                weekly: reader.u64()?,
                monthly: reader.u64()?,
                yearly: reader.u64()?,
                total: reader.u64()?,
            };
            let total_tokens_withdrawn = reader.u64()?;
            let starter_bonus_claimed = reader.bool()?;
            let stats = PlayerStats {
                battles: reader.u64()?,
                wins: reader.u64()?,
                losses: reader.u64()?,
                upgrade_attempts: reader.u64()?,
                successful_upgrades: reader.u64()?,
                gold_earned: reader.u64()?,
                gold_spent: reader.u64()?,
            };
            let created_at = reader.timestamp()?;
            Record::Account(Account {
                id,
                gold,
                tokens,
                tournament_tickets,
                is_vip,
                vip_expires_at: has_expiry.then_some(expiry),
                points,
                total_tokens_withdrawn,
                starter_bonus_claimed,
                stats,
                created_at,
            })
        }
        TAG_CARD => Record::Card(Card {
            id: reader.u64()?,
            card_number: reader.u8()?,
            owner_id: reader.u64()?,
            stats: CardStats {
                atk: reader.u32()?,
                def: reader.u32()?,
                hp: reader.u32()?,
            },
            daily_gold_production: reader.u64()?,
            last_gold_claim: reader.timestamp()?,
            upgrade_level: reader.u32()?,
            upgrade_attempts: reader.u32()?,
        }),
        tag => return Err(PersistError::Corrupt(format!("unknown record tag {tag}"))),
    };

    if !reader.data.is_empty() {
        return Err(PersistError::Corrupt(format!(
            "{} trailing bytes after record",
            reader.data.len()
        )));
    }
    Ok(record)
}

struct Reader<'a> {
    data: &'a [u8],
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> PersistResult<[u8; N]> {
        if self.data.len() < N {
            return Err(PersistError::Corrupt("record truncated".to_string()));
        }
        let (head, rest) = self.data.split_at(N);
        self.data = rest;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn u8(&mut self) -> PersistResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn bool(&mut self) -> PersistResult<bool> {
        Ok(self.u8()? != 0)
    }

    fn u32(&mut self) -> PersistResult<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn u64(&mut self) -> PersistResult<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    fn timestamp(&mut self) -> PersistResult<DateTime<Utc>> {
        let secs = i64::from_le_bytes(self.take()?);
        let nanos = self.u32()?;
        DateTime::from_timestamp(secs, nanos)
            .ok_or_else(|| PersistError::Corrupt(format!("bad timestamp {secs}.{nanos:09}")))
    }

    fn date(&mut self) -> PersistResult<NaiveDate> {
        let days = i32::from_le_bytes(self.take()?);
        NaiveDate::from_num_days_from_ce_opt(days)
            .ok_or_else(|| PersistError::Corrupt(format!("bad date {days}")))
    }
}
