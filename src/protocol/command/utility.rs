use crate::charset::Charset;
use crate::constant::CommandByte;
use crate::protocol::primitive::*;

/// Argument of COM_SET_OPTION
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOption {
    MultiStatementsOn = 0,
    MultiStatementsOff = 1,
}

/// Write COM_QUIT command
pub fn write_quit(out: &mut Vec<u8>) {
    write_int_1(out, CommandByte::Quit as u8);
}

/// Write COM_PING command
pub fn write_ping(out: &mut Vec<u8>) {
    write_int_1(out, CommandByte::Ping as u8);
}

/// Write COM_INIT_DB command
pub fn write_init_db(out: &mut Vec<u8>, database: &str, charset: Charset) {
    write_int_1(out, CommandByte::InitDb as u8);
    out.extend_from_slice(&charset.encode(database));
}

/// Write COM_RESET_CONNECTION command
pub fn write_reset_connection(out: &mut Vec<u8>) {
    write_int_1(out, CommandByte::ResetConnection as u8);
}

/// Write COM_SET_OPTION command; the server answers with EOF or ERR
pub fn write_set_option(out: &mut Vec<u8>, option: SetOption) {
    write_int_1(out, CommandByte::SetOption as u8);
    write_int_2(out, option as u16);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_bytes() {
        let mut out = Vec::new();
        write_init_db(&mut out, "shop", Charset::Utf8mb4);
        assert_eq!(out, b"\x02shop");

        out.clear();
        write_set_option(&mut out, SetOption::MultiStatementsOff);
        assert_eq!(out, [0x1B, 0x01, 0x00]);

        out.clear();
        write_ping(&mut out);
        write_quit(&mut out);
        write_reset_connection(&mut out);
        assert_eq!(out, [0x0E, 0x01, 0x1F]);
    }
}
