/*
 * plover - protocol parser tests.
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

use super::*;
use crate::Flag;

#[test]
fn test_classify_line_is_total() {
    match classify_line(b"+ Ready for literal data\r\n") {
        ResponseLine::Continuation(payload) => {
            assert_eq!(payload.trim(), b"Ready for literal data");
        }
        other => panic!("expected continuation, got {:?}", other),
    }
    assert!(matches!(
        classify_line(b"* 23 EXISTS\r\n"),
        ResponseLine::Untagged {
            kind: UntaggedKind::Exists(23),
            ..
        }
    ));
    assert!(matches!(
        classify_line(b"* 44 EXPUNGE\r\n"),
        ResponseLine::Untagged {
            kind: UntaggedKind::Expunge(44),
            ..
        }
    ));
    assert!(matches!(
        classify_line(b"* 0 RECENT\r\n"),
        ResponseLine::Untagged {
            kind: UntaggedKind::Recent(0),
            ..
        }
    ));
    assert!(matches!(
        classify_line(b"* 2 FETCH (FLAGS (\\Seen))\r\n"),
        ResponseLine::Untagged {
            kind: UntaggedKind::Fetch(2),
            ..
        }
    ));
    assert!(matches!(
        classify_line(b"* BYE Autologout; idle for too long\r\n"),
        ResponseLine::Untagged {
            kind: UntaggedKind::Bye,
            ..
        }
    ));
    assert!(matches!(
        classify_line(b"* SEARCH 2 84 882\r\n"),
        ResponseLine::Untagged {
            kind: UntaggedKind::Search,
            ..
        }
    ));
    match classify_line(b"T42 OK FETCH completed\r\n") {
        ResponseLine::Tagged { tag, status, rest } => {
            assert_eq!(tag, b"T42");
            assert_eq!(status, TaggedStatus::Ok);
            assert_eq!(rest.trim(), b"FETCH completed");
        }
        other => panic!("expected tagged line, got {:?}", other),
    }
    assert!(matches!(
        classify_line(b"T1 NO [TRYCREATE] No such mailbox\r\n"),
        ResponseLine::Tagged {
            status: TaggedStatus::No,
            ..
        }
    ));
    assert!(matches!(
        classify_line(b"T1 BAD Invalid command\r\n"),
        ResponseLine::Tagged {
            status: TaggedStatus::Bad,
            ..
        }
    ));
    // A status word must end at a word boundary.
    assert!(matches!(
        classify_line(b"T1 OKAY then\r\n"),
        ResponseLine::Unrecognized(_)
    ));
    assert!(matches!(
        classify_line(b"complete garbage\r\n"),
        ResponseLine::Unrecognized(_)
    ));
    assert!(matches!(
        classify_line(b"\r\n"),
        ResponseLine::Unrecognized(_)
    ));
}

#[test]
fn test_untagged_kind_word_boundary() {
    assert!(matches!(
        classify_line(b"* FLAGS (\\Answered \\Seen)\r\n"),
        ResponseLine::Untagged {
            kind: UntaggedKind::Flags,
            ..
        }
    ));
    // `FLAGSX` is not `FLAGS`.
    assert!(matches!(
        classify_line(b"* FLAGSX nonsense\r\n"),
        ResponseLine::Untagged {
            kind: UntaggedKind::Unknown,
            ..
        }
    ));
    assert!(matches!(
        classify_line(b"* LIST (\\HasChildren) \".\" INBOX\r\n"),
        ResponseLine::Untagged {
            kind: UntaggedKind::List,
            ..
        }
    ));
}

#[test]
fn test_response_code_uidplus() {
    assert_eq!(
        ResponseCode::from(b"[COPYUID 1 2 3] Done"),
        ResponseCode::Copyuid {
            uidvalidity: 1,
            source: 2,
            dest: 3,
        }
    );
    // uid-sets: the first UID of each set is the one this client sent.
    assert_eq!(
        ResponseCode::from(b"[COPYUID 38505 304:310 3956:3962] Done"),
        ResponseCode::Copyuid {
            uidvalidity: 38505,
            source: 304,
            dest: 3956,
        }
    );
    assert_eq!(
        ResponseCode::from(b"[APPENDUID 38505 3955] (Success)"),
        ResponseCode::Appenduid {
            uidvalidity: 38505,
            uid: 3955,
        }
    );
}

#[test]
fn test_response_codes() {
    assert_eq!(ResponseCode::from(b"[READ-ONLY] Examined"), ResponseCode::ReadOnly);
    assert_eq!(
        ResponseCode::from(b"[READ-WRITE] Selected"),
        ResponseCode::ReadWrite
    );
    assert_eq!(
        ResponseCode::from(b"[TRYCREATE] No such mailbox"),
        ResponseCode::Trycreate
    );
    assert_eq!(
        ResponseCode::from(b"[UIDNEXT 4392] Predicted next UID"),
        ResponseCode::Uidnext(4392)
    );
    assert_eq!(
        ResponseCode::from(b"[UIDVALIDITY 3857529045] UIDs valid"),
        ResponseCode::Uidvalidity(3857529045)
    );
    assert_eq!(
        ResponseCode::from(b"[UNSEEN 12] Message 12 is first unseen"),
        ResponseCode::Unseen(12)
    );
    assert_eq!(
        ResponseCode::from(b"[ALERT] System shutdown in 10 minutes"),
        ResponseCode::Alert("System shutdown in 10 minutes".to_string())
    );
    assert_eq!(ResponseCode::from(b""), ResponseCode::None);
}

#[test]
fn test_response_code_display() {
    assert_eq!(
        ResponseCode::Badcharset(None).to_string(),
        "Given charset is not supported by this server."
    );
    assert_eq!(
        ResponseCode::Badcharset(Some("UTF-8".to_string())).to_string(),
        "Given charset is not supported by this server. Supported ones are: UTF-8"
    );
    assert_eq!(ResponseCode::None.to_string(), "None");
}

#[test]
fn test_capabilities() {
    let (_, caps) = capabilities(
        b"* CAPABILITY IMAP4rev1 LITERAL+ SASL-IR LOGIN-REFERRALS ID ENABLE IDLE UIDPLUS \
          AUTH=PLAIN\r\n",
    )
    .unwrap();
    assert!(caps.contains(&b"IMAP4rev1".as_slice()));
    assert!(caps.contains(&b"UIDPLUS".as_slice()));
    assert!(caps.contains(&b"AUTH=PLAIN".as_slice()));
    assert!(!caps.contains(&b"LOGINDISABLED".as_slice()));
}

#[test]
fn test_flags() {
    let (_, (flag, keywords)) = flags(b"\\Answered \\Flagged \\Deleted \\Seen \\Draft)").unwrap();
    assert_eq!(
        flag,
        Flag::REPLIED | Flag::FLAGGED | Flag::TRASHED | Flag::SEEN | Flag::DRAFT
    );
    assert!(keywords.is_empty());

    let (_, (flag, keywords)) = flags(b"\\Seen \\Recent NonJunk $Forwarded)").unwrap();
    assert_eq!(flag, Flag::SEEN | Flag::RECENT);
    assert_eq!(keywords, vec!["NonJunk".to_string(), "$Forwarded".to_string()]);

    let (_, (flag, keywords)) = flags(b")").unwrap();
    assert_eq!(flag, Flag::default());
    assert!(keywords.is_empty());
}

#[test]
fn test_list_mailbox_result() {
    let (_, entry) = list_mailbox_result(b"* LIST (\\HasNoChildren) \".\" INBOX.Sent\r\n").unwrap();
    assert_eq!(entry.path, "INBOX.Sent");
    assert_eq!(entry.delimiter, Some(b'.'));
    assert!(entry.has_no_children);
    assert!(!entry.no_select);

    let (_, entry) = list_mailbox_result(b"* LIST (\\HasChildren) \".\" INBOX\r\n").unwrap();
    assert_eq!(entry.path, "INBOX");
    assert!(entry.has_children);

    let (_, entry) =
        list_mailbox_result(b"* LIST (\\NoSelect \\HasChildren) \"/\" \"[Gmail]\"\r\n").unwrap();
    assert_eq!(entry.path, "[Gmail]");
    assert_eq!(entry.delimiter, Some(b'/'));
    assert!(entry.no_select);

    let (_, entry) = list_mailbox_result(b"* LIST (\\NoInferiors \\Marked) NIL inbox\r\n").unwrap();
    assert_eq!(entry.path, "inbox");
    assert_eq!(entry.delimiter, None);
    assert!(entry.no_inferiors);
    assert!(entry.marked);

    let (_, entry) = list_mailbox_result(b"* LSUB (\\Unmarked) \".\" INBOX.Drafts\r\n").unwrap();
    assert_eq!(entry.path, "INBOX.Drafts");
    assert!(entry.unmarked);
}

#[test]
fn test_select_response() {
    let response = b"* 172 EXISTS\r\n\
                     * 1 RECENT\r\n\
                     * OK [UNSEEN 12] Message 12 is first unseen\r\n\
                     * OK [UIDVALIDITY 3857529045] UIDs valid\r\n\
                     * OK [UIDNEXT 4392] Predicted next UID\r\n\
                     * FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n\
                     * OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited\r\n\
                     A142 OK [READ-WRITE] SELECT completed\r\n";
    let ret = select_response(response).unwrap();
    assert_eq!(ret.exists, 172);
    assert_eq!(ret.recent, 1);
    assert_eq!(ret.first_unseen, 12);
    assert_eq!(ret.uidvalidity, 3857529045);
    assert_eq!(ret.uidnext, 4392);
    assert_eq!(
        ret.flags.0,
        Flag::REPLIED | Flag::FLAGGED | Flag::TRASHED | Flag::SEEN | Flag::DRAFT
    );
    assert_eq!(ret.permanentflags.0, Flag::TRASHED | Flag::SEEN);
    assert!(ret.can_create_flags);
    assert!(!ret.read_only);
}

#[test]
fn test_select_response_read_only() {
    let response = b"* 3 EXISTS\r\n\
                     * OK [UIDVALIDITY 9] UIDs valid\r\n\
                     A932 OK [READ-ONLY] EXAMINE completed\r\n";
    let ret = select_response(response).unwrap();
    assert_eq!(ret.exists, 3);
    assert!(ret.read_only);
    assert!(!ret.can_create_flags);
}

#[test]
fn test_search_results() {
    let (_, v) = search_results(b"* SEARCH 2 84 882\r\n").unwrap();
    assert_eq!(v, vec![2, 84, 882]);
    let (_, v) = search_results(b"* SEARCH\r\n").unwrap();
    assert!(v.is_empty());
}

#[test]
fn test_fetch_response_with_literal() {
    let input = b"* 27 FETCH (UID 923 FLAGS (\\Seen) RFC822.SIZE 2048 BODY[] {10}\r\n0123456789)\r\n";
    let (rest, ret) = fetch_response(input).unwrap();
    assert!(rest.is_empty());
    assert_eq!(ret.message_sequence_number, 27);
    assert_eq!(ret.uid, Some(923));
    assert_eq!(ret.flags.as_ref().map(|(f, _)| *f), Some(Flag::SEEN));
    assert_eq!(ret.rfc822_size, Some(2048));
    assert_eq!(ret.body, Some(b"0123456789".as_slice()));
    assert_eq!(ret.raw_fetch_value, input.as_slice());
}

#[test]
fn test_fetch_response_literal_contains_crlf() {
    // Literal bytes must pass through unparsed even when they look like
    // response lines.
    let input = b"* 2 FETCH (UID 7 BODY[HEADER] {26}\r\nSubject: * 1 EXPUNGE\r\nX: y)\r\n";
    let (_, ret) = fetch_response(input).unwrap();
    assert_eq!(ret.uid, Some(7));
    assert_eq!(ret.body, Some(b"Subject: * 1 EXPUNGE\r\nX: y".as_slice()));
}

#[test]
fn test_fetch_responses_multiple() {
    let input = b"* 1 FETCH (UID 10 FLAGS (\\Seen))\r\n\
                  * 2 FETCH (UID 11 FLAGS ())\r\n\
                  * 3 FETCH (UID 12 FLAGS (\\Flagged NonJunk))\r\n";
    let v = fetch_responses(input).unwrap();
    assert_eq!(v.len(), 3);
    assert_eq!(v[0].uid, Some(10));
    assert_eq!(v[1].flags.as_ref().map(|(f, _)| *f), Some(Flag::default()));
    assert_eq!(v[2].flags.as_ref().map(|(f, _)| *f), Some(Flag::FLAGGED));
    assert_eq!(v[2].flags.as_ref().map(|(_, kw)| kw.clone()), Some(vec!["NonJunk".to_string()]));
}

#[test]
fn test_fetch_response_rejects_junk() {
    assert!(fetch_response(b"M14 OK Fetch completed\r\n").is_err());
    assert!(fetch_response(b"* 5 FETCH (WAT)\r\n").is_err());
}

#[test]
fn test_uid_fetch_flags_response_item_order() {
    let (_, (uid, (flag, _))) =
        uid_fetch_flags_response(b"* 23 FETCH (UID 42 FLAGS (\\Seen \\Flagged))\r\n").unwrap();
    assert_eq!(uid, 42);
    assert_eq!(flag, Flag::SEEN | Flag::FLAGGED);

    let (_, (uid, (flag, _))) =
        uid_fetch_flags_response(b"* 23 FETCH (FLAGS (\\Draft) UID 43)\r\n").unwrap();
    assert_eq!(uid, 43);
    assert_eq!(flag, Flag::DRAFT);

    let (_, v) = uid_fetch_flags_responses(
        b"* 1 FETCH (UID 5 FLAGS (\\Seen))\r\n* 2 FETCH (UID 6 FLAGS ())\r\n",
    )
    .unwrap();
    assert_eq!(v.len(), 2);
    assert_eq!(v[0].0, 5);
    assert_eq!(v[1].0, 6);
}

#[test]
fn test_split_rn_skips_literals() {
    let input = b"* 1 FETCH (BODY[] {12}\r\nabcd\r\nefgh\r\n)\r\n* 2 FETCH (UID 9)\r\nT1 OK done\r\n";
    let lines: Vec<&[u8]> = input.split_rn().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        b"* 1 FETCH (BODY[] {12}\r\nabcd\r\nefgh\r\n)\r\n".as_slice()
    );
    assert_eq!(lines[1], b"* 2 FETCH (UID 9)\r\n".as_slice());
    assert_eq!(lines[2], b"T1 OK done\r\n".as_slice());
}

#[test]
fn test_split_rn_truncated_literal_does_not_panic() {
    // The literal announces 100 bytes but the buffer ends after 4.
    let input = b"* 1 FETCH (BODY[] {100}\r\nabcd";
    let lines: Vec<&[u8]> = input.split_rn().collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0], input.as_slice());
}

#[test]
fn test_split_rn_without_trailing_crlf() {
    let input = b"* 1 EXISTS\r\npartial tail";
    let lines: Vec<&[u8]> = input.split_rn().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1], b"partial tail".as_slice());
}

#[test]
fn test_mailbox_token() {
    let (_, name) = mailbox_token(b"\"INBOX.Lists and Stuff\"\r\n").unwrap();
    assert_eq!(name, "INBOX.Lists and Stuff");
    let (_, name) = mailbox_token(b"INBOX.Sent\r\n").unwrap();
    assert_eq!(name, "INBOX.Sent");
}
