use tracing::{event, Level};

use base::prelude::*;

use crate::abort::Abort;
use crate::ea::Ea;
use crate::kn10::Kn10;
use crate::trap::process_context_word;

use super::PcInc;

const PAG_ENABLE: u32 = 0o020_000;
const PAG_PAGE_MASK: u32 = 0o017_777;
const DATAO_PAG_SELECT_BLOCKS: u32 = 0o400_000;
const DATAO_PAG_LOAD_UPT: u32 = 0o100_000;

/// ## I/O instructions
///
/// The processor answers device codes APR (000), PI (004), PAG (010),
/// TIM (020) and MTR (024) itself; any other code goes to the device
/// registered for it on the I/O bus, and nothing answers an
/// unregistered code (reads give zero).  RDIO and WRIO reach the
/// Unibus adapters.  BLKI and BLKO are not implemented (MUUO).
///
/// In user mode, I/O instructions are MUUOs unless USERIO is set.
impl Kn10 {
    pub(crate) fn op_io(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        if !self.io_allowed() {
            return self.muuo(inst, ea);
        }
        match inst.opcode() {
            opcodes::RDIO => return self.op_rdio(inst, ea),
            opcodes::WRIO => return self.op_wrio(inst, ea),
            _ => (),
        }
        let device = inst.io_device();
        match inst.io_function() {
            IoFunction::Blki | IoFunction::Blko => self.muuo(inst, ea),
            IoFunction::Cono => {
                self.cono(device, ea.address.offset())?;
                Ok(PcInc::Next)
            }
            IoFunction::Coni => {
                let value = self.coni(device);
                self.write_data(ea, value)?;
                Ok(PcInc::Next)
            }
            IoFunction::Consz => {
                let value = self.coni(device);
                Ok(PcInc::skip_if(value.rh() & ea.address.offset() == 0))
            }
            IoFunction::Conso => {
                let value = self.coni(device);
                Ok(PcInc::skip_if(value.rh() & ea.address.offset() != 0))
            }
            IoFunction::Datai => {
                let value = self.datai(device);
                self.write_data(ea, value)?;
                Ok(PcInc::Next)
            }
            IoFunction::Datao => {
                let value = self.read_data(ea)?;
                self.datao(device, value);
                Ok(PcInc::Next)
            }
        }
    }

    fn cono(&mut self, device: DeviceCode, bits: u32) -> Result<(), Abort> {
        match device {
            DeviceCode::APR => self.cono_apr(bits),
            DeviceCode::PI => {
                self.pi.cono(bits);
                self.pi_recheck();
            }
            DeviceCode::PAG => {
                self.mem.set_ept_page(bits & PAG_PAGE_MASK);
                self.mem.set_paging(bits & PAG_ENABLE != 0);
            }
            DeviceCode::TIM => self.cono_tim(bits)?,
            DeviceCode::MTR => {
                self.clock.cono_mtr(bits);
                self.pi_devupd();
            }
            other => {
                if let Some(id) = self.bus.iobus_device(other) {
                    self.with_device(id, |d, ctx| d.conditions_out(ctx, bits));
                }
            }
        }
        Ok(())
    }

    fn coni(&mut self, device: DeviceCode) -> Word {
        match device {
            DeviceCode::APR => self.apr.coni(),
            DeviceCode::PI => self.pi.coni(),
            DeviceCode::PAG => {
                let mut rh = self.mem.ept_page();
                if self.mem.paging() {
                    rh |= PAG_ENABLE;
                }
                Word::from_halves(0, rh)
            }
            DeviceCode::TIM => self.clock.coni_tim(),
            DeviceCode::MTR => self.clock.coni_mtr(),
            other => self
                .bus
                .iobus_device(other)
                .and_then(|id| self.with_device(id, |d, ctx| d.conditions_in(ctx)))
                .unwrap_or(Word::ZERO),
        }
    }

    fn datai(&mut self, device: DeviceCode) -> Word {
        match device {
            DeviceCode::PAG => process_context_word(
                self.cpu.current_block(),
                self.cpu.previous_block(),
                self.mem.upt_page(),
            ),
            DeviceCode::TIM => self.clock.datai_tim(),
            DeviceCode::APR | DeviceCode::PI | DeviceCode::MTR => Word::ZERO,
            other => self
                .bus
                .iobus_device(other)
                .and_then(|id| self.with_device(id, |d, ctx| d.data_in(ctx)))
                .unwrap_or(Word::ZERO),
        }
    }

    fn datao(&mut self, device: DeviceCode, value: Word) {
        match device {
            DeviceCode::PAG => {
                let lh = value.lh();
                if lh & DATAO_PAG_SELECT_BLOCKS != 0 {
                    self.cpu
                        .select_ac_blocks(((lh >> 9) & 7) as u8, ((lh >> 6) & 7) as u8);
                }
                if lh & DATAO_PAG_LOAD_UPT != 0 {
                    self.mem.set_upt_page(value.rh() & PAG_PAGE_MASK);
                }
            }
            DeviceCode::APR | DeviceCode::PI | DeviceCode::TIM | DeviceCode::MTR => {
                event!(Level::TRACE, "DATAO {} ignored", device);
            }
            other => {
                if let Some(id) = self.bus.iobus_device(other) {
                    self.with_device(id, |d, ctx| d.data_out(ctx, value));
                }
            }
        }
    }

    /// The Unibus adapter and address an RDIO or WRIO refers to.  The
    /// adapter number is in bits 14-17 of the word which supplied the
    /// address: the section of a global address, or the left half of
    /// the index register or indirect word.
    fn unibus_address(&self, inst: Instruction, ea: Ea) -> (u8, u32) {
        let adapter = if self.extended && ea.global {
            ea.address.section() & 0o17
        } else if inst.index() != 0 || inst.indirect() {
            ea.flag_word.lh() & 0o17
        } else {
            0
        };
        (adapter as u8, ea.address.offset())
    }

    fn op_rdio(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let (adapter, address) = self.unibus_address(inst, ea);
        let value = self.unibus_read(adapter, address)?;
        self.set_ac(inst.ac(), Word::from(value));
        Ok(PcInc::Next)
    }

    fn op_wrio(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let (adapter, address) = self.unibus_address(inst, ea);
        let value = (self.ac(inst.ac()).bits() & 0o177_777) as u32;
        self.unibus_write(adapter, address, value)?;
        Ok(PcInc::Next)
    }
}
