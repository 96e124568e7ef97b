/*
 * plover - mailbox hierarchy.
 *
 * This file is part of plover.
 *
 * plover is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * plover is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with plover. If not, see <http://www.gnu.org/licenses/>.
 */

//! Bounded-depth mailbox discovery with one-level `LIST` queries.
//!
//! Wildcarding with `*` can explode on servers exposing huge virtual
//! hierarchies, so discovery walks breadth-first with `%` patterns and an
//! explicit depth bound.

use std::collections::VecDeque;

use indexmap::IndexSet;

use crate::{
    connection::{quoted, ImapConnection},
    error::Result,
    protocol_parser::{list_mailbox_result, ImapLineSplit},
    BytesExt,
};

/// One discovered mailbox, annotated with its depth below the traversal
/// base.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MailboxNode {
    /// Full server-side path.
    pub path: String,
    /// Last path segment.
    pub name: String,
    pub delimiter: Option<u8>,
    /// 0 for entries directly under the traversal base.
    pub level: usize,
    /// Cannot be SELECTed, only traversed.
    pub no_select: bool,
    pub has_children: bool,
}

fn leaf_name(path: &str, delimiter: Option<u8>) -> String {
    match delimiter {
        Some(d) => path
            .rsplit(d as char)
            .next()
            .unwrap_or(path)
            .to_string(),
        None => path.to_string(),
    }
}

/// Breadth-first `LIST "" <prefix>%` traversal below `base` (empty for the
/// root), visiting at most `max_depth` levels. A server echoing the query
/// base itself is deduplicated. Returns a flat, level-annotated forest in
/// discovery order.
pub fn list_hierarchy(
    conn: &mut ImapConnection,
    base: &str,
    max_depth: usize,
) -> Result<Vec<MailboxNode>> {
    let mut ret = Vec::new();
    if max_depth == 0 {
        return Ok(ret);
    }
    let mut seen: IndexSet<String> = IndexSet::new();
    if !base.is_empty() {
        seen.insert(base.to_string());
    }
    // (pattern prefix including trailing delimiter, level of its children)
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    queue.push_back((base.to_string(), 0));

    while let Some((parent, level)) = queue.pop_front() {
        let pattern = format!("{}%", parent);
        let command = format!("LIST \"\" {}", quoted(&pattern));
        let mut response = Vec::with_capacity(4 * 1024);
        conn.exchange(command.as_bytes(), |l| {
            response.extend_from_slice(l);
            Ok(())
        })?;

        for line in response.split_rn() {
            let entry = match list_mailbox_result(line) {
                Ok((_, entry)) => entry,
                Err(_) => {
                    if !line.trim().is_empty() {
                        log::debug!(
                            "skipping non-LIST line in LIST response: {}",
                            String::from_utf8_lossy(line)
                        );
                    }
                    continue;
                }
            };
            if !seen.insert(entry.path.clone()) {
                // Self-echo of the query base, or a duplicate listing.
                continue;
            }
            let has_children = entry.has_children || !(entry.has_no_children || entry.no_inferiors);
            if has_children && level + 1 < max_depth {
                if let Some(d) = entry.delimiter {
                    queue.push_back((format!("{}{}", entry.path, d as char), level + 1));
                }
            }
            ret.push(MailboxNode {
                name: leaf_name(&entry.path, entry.delimiter),
                path: entry.path,
                delimiter: entry.delimiter,
                level,
                no_select: entry.no_select,
                has_children,
            });
        }
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{fixture_connection, written_bytes};

    #[test]
    fn test_list_hierarchy_breadth_first() {
        let input = b"* LIST (\\HasChildren) \".\" INBOX\r\n\
                      * LIST (\\HasNoChildren) \".\" Drafts\r\n\
                      T1 OK LIST completed\r\n\
                      * LIST (\\HasChildren) \".\" INBOX\r\n\
                      * LIST (\\HasNoChildren) \".\" INBOX.Sent\r\n\
                      * LIST (\\NoSelect \\HasChildren) \".\" INBOX.Lists\r\n\
                      T2 OK LIST completed\r\n";
        let mut conn = fixture_connection(input);
        let nodes = list_hierarchy(&mut conn, "", 2).unwrap();
        let written = written_bytes(&conn);
        assert!(written.starts_with(b"T1 LIST \"\" \"%\"\r\nT2 LIST \"\" \"INBOX.%\"\r\n"));
        // Depth bound 2: INBOX.Lists has children but is not descended into.
        assert!(!written.contains_subsequence(b"T3 "));

        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[0].path, "INBOX");
        assert_eq!(nodes[0].level, 0);
        assert!(nodes[0].has_children);
        assert_eq!(nodes[1].path, "Drafts");
        assert!(!nodes[1].has_children);
        // The self-echo of INBOX in the second response was deduplicated.
        assert_eq!(nodes[2].path, "INBOX.Sent");
        assert_eq!(nodes[2].name, "Sent");
        assert_eq!(nodes[2].level, 1);
        assert_eq!(nodes[3].path, "INBOX.Lists");
        assert!(nodes[3].no_select);
    }

    #[test]
    fn test_list_hierarchy_under_base() {
        let input = b"* LIST (\\HasNoChildren) \"/\" Work/Reports\r\n\
                      T1 OK LIST completed\r\n";
        let mut conn = fixture_connection(input);
        let nodes = list_hierarchy(&mut conn, "Work/", 1).unwrap();
        assert!(written_bytes(&conn).starts_with(b"T1 LIST \"\" \"Work/%\"\r\n"));
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "Reports");
        assert_eq!(nodes[0].level, 0);
    }

    #[test]
    fn test_list_hierarchy_zero_depth() {
        let mut conn = fixture_connection(b"");
        let nodes = list_hierarchy(&mut conn, "", 0).unwrap();
        assert!(nodes.is_empty());
        assert!(written_bytes(&conn).is_empty());
    }
}
